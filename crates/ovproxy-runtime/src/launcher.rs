//! Launcher binding over Unix sockets.
//!
//! The overview service for user `u` listens on `<launcher-dir>/overview-<u>.sock`.
//! Each bind spawns one task that owns the stream: it posts `ServiceConnected`
//! with a [`RemoteOverviewProxy`], writes outbound notifications, and on EOF
//! posts `RemoteDied` (when armed) followed by `ServiceDisconnected`.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use ovproxy_core::types::{BackAction, InitParams, NavBarRegion, UserId};
use ovproxy_daemon::binder::{BindOutcome, BindingId, OverviewProxy, ServiceBinder};
use ovproxy_daemon::error::{BindError, RemoteError};
use ovproxy_daemon::manager::ManagerEvent;

use crate::event_loop::QueueHandle;

pub struct LauncherBinder {
    launcher_dir: PathBuf,
    queue: QueueHandle,
    next_binding: u64,
    active: Option<JoinHandle<()>>,
}

impl LauncherBinder {
    pub fn new(launcher_dir: impl Into<PathBuf>, queue: QueueHandle) -> Self {
        Self {
            launcher_dir: launcher_dir.into(),
            queue,
            next_binding: 0,
            active: None,
        }
    }

    pub fn socket_for(&self, user: UserId) -> PathBuf {
        self.launcher_dir.join(format!("overview-{user}.sock"))
    }
}

impl ServiceBinder for LauncherBinder {
    type Proxy = RemoteOverviewProxy;

    fn is_available(&self, user: UserId) -> bool {
        self.socket_for(user).exists()
    }

    fn bind(&mut self, user: UserId) -> Result<BindOutcome, BindError> {
        let path = self.socket_for(user);
        match std::fs::metadata(&path) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BindOutcome::NotFound),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(BindError::Security(format!("{}: {e}", path.display())));
            }
            Err(e) => return Err(e.into()),
        }

        self.unbind();
        self.next_binding += 1;
        let binding = BindingId(self.next_binding);
        let queue = self.queue.clone();
        self.active = Some(tokio::spawn(run_binding(path, binding, queue)));
        Ok(BindOutcome::Bound(binding))
    }

    fn unbind(&mut self) {
        if let Some(handle) = self.active.take() {
            handle.abort();
        }
    }
}

impl Drop for LauncherBinder {
    fn drop(&mut self) {
        self.unbind();
    }
}

async fn run_binding(path: PathBuf, binding: BindingId, queue: QueueHandle) {
    let stream = match UnixStream::connect(&path).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(%binding, "cannot connect to overview service at {}: {e}", path.display());
            queue.post_event(ManagerEvent::BindingDied { binding });
            return;
        }
    };

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let death_armed = Arc::new(AtomicBool::new(false));
    let proxy = RemoteOverviewProxy {
        out: out_tx,
        death_armed: Arc::clone(&death_armed),
    };
    if !queue.post_event(ManagerEvent::ServiceConnected { binding, proxy }) {
        return;
    }

    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => tracing::trace!(%binding, "overview service sent: {line}"),
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(%binding, "overview service read error: {e}");
                    break;
                }
            },
            Some(message) = out_rx.recv() => {
                if let Err(e) = writer.write_all(message.as_bytes()).await {
                    tracing::debug!(%binding, "overview service write error: {e}");
                    break;
                }
            }
        }
    }

    tracing::debug!(%binding, socket = %path.display(), "overview service stream closed");
    if death_armed.swap(false, Ordering::SeqCst) {
        queue.post_event(ManagerEvent::RemoteDied { binding });
    }
    queue.post_event(ManagerEvent::ServiceDisconnected { binding });
}

/// Handle to a connected overview service. Calls are JSON-RPC 2.0 notifications.
#[derive(Debug)]
pub struct RemoteOverviewProxy {
    out: mpsc::UnboundedSender<String>,
    death_armed: Arc<AtomicBool>,
}

impl RemoteOverviewProxy {
    fn notify(&self, method: &str, params: impl Serialize) -> Result<(), RemoteError> {
        let params = serde_json::to_value(params).map_err(|e| RemoteError::Transport(e.to_string()))?;
        let message = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        let mut line =
            serde_json::to_string(&message).map_err(|e| RemoteError::Transport(e.to_string()))?;
        line.push('\n');
        self.out.send(line).map_err(|_| RemoteError::DeadObject)
    }
}

impl OverviewProxy for RemoteOverviewProxy {
    fn link_to_death(&mut self) -> Result<(), RemoteError> {
        if self.out.is_closed() {
            return Err(RemoteError::DeadObject);
        }
        self.death_armed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn unlink_to_death(&mut self) {
        self.death_armed.store(false, Ordering::SeqCst);
    }

    fn on_initialize(&self, params: &InitParams) -> Result<(), RemoteError> {
        self.notify("onInitialize", params)
    }

    fn on_back_action(&self, action: &BackAction) -> Result<(), RemoteError> {
        self.notify("onBackAction", action)
    }

    fn on_active_nav_bar_region_changes(&self, region: &NavBarRegion) -> Result<(), RemoteError> {
        self.notify("onActiveNavBarRegionChanges", region)
    }

    fn on_assistant_visibility_changed(&self, visibility: f32) -> Result<(), RemoteError> {
        self.notify(
            "onAssistantVisibilityChanged",
            serde_json::json!({ "visibility": visibility }),
        )
    }
}
