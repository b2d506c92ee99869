//! Daemon wiring: manager queue, launcher binder, prefs and the UDS server.

use std::path::Path;
use std::time::Duration;

use ovproxy_core::backoff::BackoffPolicy;
use ovproxy_core::listener::OverviewProxyListener;
use ovproxy_core::types::{AssistantBundle, InitParams, InteractionFlags, MotionEvent};
use ovproxy_daemon::manager::{ManagerConfig, ManagerEvent, ProxyConnectionManager};

use crate::cli::{self, DaemonOpts};
use crate::event_loop::{QueueHandle, TokioScheduler, run_queue};
use crate::launcher::LauncherBinder;
use crate::prefs::JsonFilePrefs;
use crate::server::{self, Endpoints};

/// Build the manager config. `sysui_endpoint` is the inbound socket handed to the service.
pub fn manager_config(opts: &DaemonOpts, sysui_endpoint: &str) -> anyhow::Result<ManagerConfig> {
    if opts.backoff_ms == 0 {
        anyhow::bail!("--backoff-ms must be at least 1");
    }
    if opts.max_backoff_ms < opts.backoff_ms {
        anyhow::bail!(
            "--max-backoff-ms ({}) must not be below --backoff-ms ({})",
            opts.max_backoff_ms,
            opts.backoff_ms
        );
    }

    Ok(ManagerConfig {
        backoff: BackoffPolicy {
            base_ms: opts.backoff_ms,
            max_ms: opts.max_backoff_ms,
        },
        deferred_connection: Duration::from_millis(opts.deferred_timeout_ms),
        init: InitParams {
            window_corner_radius: opts.corner_radius,
            supports_rounded_corners: opts.rounded_corners,
            sysui_endpoint: sysui_endpoint.to_string(),
        },
        initial_user: opts.user,
        user_setup: opts.user_setup,
        legacy_nav_mode: opts.legacy_nav,
    })
}

fn load_prefs(state_dir: &Path) -> JsonFilePrefs {
    match JsonFilePrefs::load(state_dir) {
        Ok(prefs) => {
            tracing::debug!(path = %prefs.path().display(), "prefs loaded");
            prefs
        }
        Err(e) => {
            tracing::warn!("ignoring unreadable prefs in {}: {e}", state_dir.display());
            JsonFilePrefs::empty(state_dir)
        }
    }
}

pub async fn run_daemon(opts: DaemonOpts, socket_path: &str) -> anyhow::Result<()> {
    let launcher_dir = opts.launcher_dir.clone().unwrap_or_else(cli::default_launcher_dir);
    let state_dir = opts.state_dir.clone().unwrap_or_else(cli::default_state_dir);
    let inbound_socket = opts
        .inbound_socket
        .clone()
        .unwrap_or_else(cli::default_inbound_socket_path);
    let config = manager_config(&opts, &inbound_socket)?;
    tracing::info!(
        launcher_dir = %launcher_dir.display(),
        state_dir = %state_dir.display(),
        user = %opts.user,
        "starting overview proxy"
    );

    // Bind before connecting so the service never gets an endpoint nobody serves.
    let endpoints = Endpoints::bind(socket_path, &inbound_socket).await?;

    let (queue, rx) = QueueHandle::channel();
    let mut manager = ProxyConnectionManager::new(
        config,
        LauncherBinder::new(launcher_dir, queue.clone()),
        TokioScheduler::new(queue.clone()),
        load_prefs(&state_dir),
    );
    manager.add_listener(Box::new(LoggingListener));
    queue.post_event(ManagerEvent::Connect);

    let queue_handle = tokio::spawn(run_queue(manager, rx));

    // Start UDS server
    let server_queue = queue.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::run_server(endpoints, server_queue).await {
            tracing::error!("UDS server error: {e}");
        }
    });

    // Wait for shutdown signal (ctrl-c or SIGTERM)
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                    }
                }
                Err(e) => {
                    tracing::warn!("failed to register SIGTERM handler: {e}");
                    ctrl_c.await.ok();
                    tracing::info!("received ctrl-c, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
    };

    tokio::select! {
        () = shutdown => {}
        _ = server_handle => {
            tracing::warn!("server exited unexpectedly");
        }
    }

    queue.shutdown();
    if let Ok(manager) = queue_handle.await {
        tracing::debug!(phase = %manager.phase(), "manager stopped");
    }

    // Cleanup sockets
    let _ = std::fs::remove_file(socket_path);
    let _ = std::fs::remove_file(&inbound_socket);
    tracing::info!("daemon stopped");
    Ok(())
}

/// Traces every listener callback.
struct LoggingListener;

impl OverviewProxyListener for LoggingListener {
    fn on_connection_changed(&mut self, is_connected: bool) {
        tracing::info!(is_connected, "overview connection changed");
    }

    fn on_quick_step_started(&mut self) {
        tracing::debug!("quick step started");
    }

    fn on_interaction_flags_changed(&mut self, flags: InteractionFlags) {
        tracing::info!(flags = flags.bits(), "interaction flags changed");
    }

    fn on_overview_shown(&mut self, from_home: bool) {
        tracing::debug!(from_home, "overview shown");
    }

    fn on_quick_scrub_started(&mut self) {
        tracing::debug!("quick scrub started");
    }

    fn on_back_button_alpha_changed(&mut self, alpha: f32, animate: bool) {
        tracing::debug!(alpha, animate, "back button alpha changed");
    }

    fn on_assistant_progress(&mut self, progress: f32) {
        tracing::trace!(progress, "assistant progress");
    }

    fn start_assistant(&mut self, bundle: &AssistantBundle) {
        tracing::info!(keys = bundle.len(), "start assistant");
    }

    fn on_status_bar_motion_event(&mut self, event: &MotionEvent) {
        tracing::trace!(action = ?event.action, x = event.x, y = event.y, "status bar motion");
    }

    fn on_screen_pinning_requested(&mut self, task_id: i32) {
        tracing::info!(task_id, "screen pinning requested");
    }

    fn on_split_screen_invoked(&mut self) {
        tracing::info!("split screen invoked");
    }
}
