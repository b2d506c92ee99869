//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use ovproxy_core::backoff::{DEFAULT_BACKOFF_MS, DEFAULT_DEFERRED_CONNECTION_MS, DEFAULT_MAX_BACKOFF_MS};
use ovproxy_core::types::UserId;

#[derive(Parser)]
#[command(name = "ovproxyd", about = "overview proxy connection daemon")]
pub struct Cli {
    /// Admin socket path (default: $XDG_RUNTIME_DIR/ovproxy/ovproxyd.sock)
    #[arg(long, short = 's', global = true, env = "OVPROXY_SOCKET")]
    pub socket_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the daemon (manager queue + UDS server)
    Daemon(DaemonOpts),
    /// Show manager status (JSON)
    Status,
    /// Switch the foreground user and rebind
    SwitchUser {
        user: UserId,
    },
    /// Mark the current user's setup as complete or not
    SetUserSetup {
        #[arg(action = ArgAction::Set)]
        setup: bool,
    },
    /// Re-resolve the overview service after it was installed or removed
    LauncherChanged,
    /// Drop the current binding and connect again
    Reconnect,
}

#[derive(clap::Args, Debug, Clone)]
pub struct DaemonOpts {
    /// Socket the overview service calls back into, open to all local users
    /// (default: $TMPDIR/ovproxy-sysui/sysui.sock)
    #[arg(long, env = "OVPROXY_INBOUND_SOCKET")]
    pub inbound_socket: Option<String>,

    /// Directory holding `overview-<user>.sock` service sockets
    #[arg(long, env = "OVPROXY_LAUNCHER_DIR")]
    pub launcher_dir: Option<PathBuf>,

    /// Directory for prefs.json
    #[arg(long, env = "OVPROXY_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// User in the foreground at startup
    #[arg(long, env = "OVPROXY_USER", default_value = "0")]
    pub user: UserId,

    /// Whether the startup user has finished setup
    #[arg(long, env = "OVPROXY_USER_SETUP", default_value_t = true, action = ArgAction::Set)]
    pub user_setup: bool,

    /// Window corner radius reported to the overview service
    #[arg(long, env = "OVPROXY_CORNER_RADIUS", default_value_t = 0.0)]
    pub corner_radius: f32,

    /// Report rounded-corner support to the overview service
    #[arg(long, env = "OVPROXY_ROUNDED_CORNERS")]
    pub rounded_corners: bool,

    /// Three-button navigation (changes default interaction flags)
    #[arg(long, env = "OVPROXY_LEGACY_NAV")]
    pub legacy_nav: bool,

    /// First reconnect delay in milliseconds
    #[arg(long, env = "OVPROXY_BACKOFF_MS", default_value_t = DEFAULT_BACKOFF_MS)]
    pub backoff_ms: u64,

    /// Reconnect delay ceiling in milliseconds
    #[arg(long, env = "OVPROXY_MAX_BACKOFF_MS", default_value_t = DEFAULT_MAX_BACKOFF_MS)]
    pub max_backoff_ms: u64,

    /// How long a bound service may take to connect, in milliseconds
    #[arg(long, env = "OVPROXY_DEFERRED_TIMEOUT_MS", default_value_t = DEFAULT_DEFERRED_CONNECTION_MS)]
    pub deferred_timeout_ms: u64,
}

fn runtime_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(dir).join("ovproxy");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/ovproxy-{user}"))
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    runtime_dir().join("ovproxyd.sock").display().to_string()
}

/// Shared location for the inbound socket, outside the private runtime dir.
pub fn default_inbound_socket_path() -> String {
    std::env::temp_dir()
        .join("ovproxy-sysui")
        .join("sysui.sock")
        .display()
        .to_string()
}

/// Launcher sockets live next to ours unless configured.
pub fn default_launcher_dir() -> PathBuf {
    runtime_dir()
}

pub fn default_state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(dir).join("ovproxy");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/ovproxy");
    }
    runtime_dir()
}
