//! ovproxyd: overview proxy connection daemon.
//! Single-process binary embedding the connection manager in-process.

use clap::Parser;

mod cli;
mod client;
mod daemon;
mod event_loop;
mod launcher;
mod prefs;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);

    match args.command {
        cli::Command::Daemon(opts) => {
            let filter = std::env::var("OVPROXY_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            tracing::info!("ovproxyd starting");
            daemon::run_daemon(opts, &socket_path).await?;
        }
        cli::Command::Status => {
            client::cmd_admin(&socket_path, "status", serde_json::json!({})).await?;
        }
        cli::Command::SwitchUser { user } => {
            let params = serde_json::json!({ "user": user });
            client::cmd_admin(&socket_path, "switchUser", params).await?;
        }
        cli::Command::SetUserSetup { setup } => {
            let params = serde_json::json!({ "setup": setup });
            client::cmd_admin(&socket_path, "setUserSetup", params).await?;
        }
        cli::Command::LauncherChanged => {
            client::cmd_admin(&socket_path, "launcherChanged", serde_json::json!({})).await?;
        }
        cli::Command::Reconnect => {
            client::cmd_admin(&socket_path, "reconnect", serde_json::json!({})).await?;
        }
    }

    Ok(())
}
