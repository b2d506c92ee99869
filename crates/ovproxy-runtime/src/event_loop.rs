//! Serialized manager queue and the tokio-backed timer scheduler.
//!
//! One task owns the [`ProxyConnectionManager`]. Everything else (launcher
//! binding tasks, timers, socket connections) talks to it by posting a
//! [`Task`] through a [`QueueHandle`].

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use ovproxy_core::types::{BackAction, NavBarRegion, UserId};
use ovproxy_daemon::inbound::{SysUiCall, SysUiReply};
use ovproxy_daemon::manager::{ManagerEvent, ProxyConnectionManager};
use ovproxy_daemon::prefs::PrefsStore;
use ovproxy_daemon::scheduler::{Scheduler, TimerKind, TimerToken};

use crate::launcher::{LauncherBinder, RemoteOverviewProxy};

pub type RuntimeEvent = ManagerEvent<RemoteOverviewProxy>;

/// Requests from the admin side of the socket.
#[derive(Debug, Clone)]
pub enum AdminCommand {
    Status,
    NotifyBackAction(BackAction),
    SetNavBarRegion(NavBarRegion),
    NotifyAssistantVisibility(f32),
    NotifyQuickStepStarted,
    NotifyQuickScrubStarted,
}

pub enum Task {
    Event(RuntimeEvent),
    Inbound {
        caller: UserId,
        call: SysUiCall,
        reply: oneshot::Sender<SysUiReply>,
    },
    Admin {
        command: AdminCommand,
        reply: oneshot::Sender<serde_json::Value>,
    },
    Shutdown,
}

/// Cloneable sender side of the manager queue.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<Task>,
}

impl QueueHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Task>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Post a manager event. Returns `false` once the queue has shut down.
    pub fn post_event(&self, event: RuntimeEvent) -> bool {
        self.tx.send(Task::Event(event)).is_ok()
    }

    pub async fn inbound(&self, caller: UserId, call: SysUiCall) -> anyhow::Result<SysUiReply> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Task::Inbound { caller, call, reply })
            .map_err(|_| anyhow::anyhow!("manager queue closed"))?;
        Ok(rx.await?)
    }

    pub async fn admin(&self, command: AdminCommand) -> anyhow::Result<serde_json::Value> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Task::Admin { command, reply })
            .map_err(|_| anyhow::anyhow!("manager queue closed"))?;
        Ok(rx.await?)
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Task::Shutdown);
    }
}

pub type RuntimeManager<S, K> = ProxyConnectionManager<LauncherBinder, S, K>;

/// Drain the queue until shutdown. Returns the manager for inspection.
pub async fn run_queue<S, K>(
    mut manager: RuntimeManager<S, K>,
    mut rx: mpsc::UnboundedReceiver<Task>,
) -> RuntimeManager<S, K>
where
    S: Scheduler,
    K: PrefsStore,
{
    while let Some(task) = rx.recv().await {
        match task {
            Task::Event(event) => manager.handle(event),
            Task::Inbound { caller, call, reply } => {
                let result = manager.handle_inbound(caller, call);
                let _ = reply.send(result);
            }
            Task::Admin { command, reply } => {
                let result = apply_admin(&mut manager, command);
                let _ = reply.send(result);
            }
            Task::Shutdown => {
                tracing::debug!("manager queue shutting down");
                break;
            }
        }
    }
    manager
}

fn apply_admin<S, K>(manager: &mut RuntimeManager<S, K>, command: AdminCommand) -> serde_json::Value
where
    S: Scheduler,
    K: PrefsStore,
{
    match command {
        AdminCommand::Status => {}
        AdminCommand::NotifyBackAction(action) => manager.notify_back_action(&action),
        AdminCommand::SetNavBarRegion(region) => manager.on_active_nav_bar_region_changes(region),
        AdminCommand::NotifyAssistantVisibility(visibility) => {
            manager.notify_assistant_visibility_changed(visibility)
        }
        AdminCommand::NotifyQuickStepStarted => manager.notify_quick_step_started(),
        AdminCommand::NotifyQuickScrubStarted => manager.notify_quick_scrub_started(),
    }
    match serde_json::to_value(manager.status()) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("failed to serialize status: {e}");
            serde_json::Value::Null
        }
    }
}

// ─── Tokio scheduler ─────────────────────────────────────────────

/// Arms `tokio::time::sleep` tasks that post `TimerFired` onto the queue.
pub struct TokioScheduler {
    queue: QueueHandle,
    next_token: u64,
    armed: HashMap<TimerKind, (TimerToken, JoinHandle<()>)>,
}

impl TokioScheduler {
    pub fn new(queue: QueueHandle) -> Self {
        Self {
            queue,
            next_token: 0,
            armed: HashMap::new(),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, timer: TimerKind, delay: Duration) -> TimerToken {
        self.cancel(timer);
        self.next_token += 1;
        let token = TimerToken(self.next_token);
        let queue = self.queue.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.post_event(ManagerEvent::TimerFired { timer, token });
        });
        self.armed.insert(timer, (token, handle));
        token
    }

    fn cancel(&mut self, timer: TimerKind) {
        if let Some((_, handle)) = self.armed.remove(&timer) {
            handle.abort();
        }
    }

    fn is_pending(&self, timer: TimerKind) -> bool {
        self.armed.contains_key(&timer)
    }

    fn acknowledge(&mut self, timer: TimerKind, token: TimerToken) -> bool {
        match self.armed.get(&timer) {
            Some((armed, _)) if *armed == token => {
                self.armed.remove(&timer);
                true
            }
            _ => false,
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.armed.values() {
            handle.abort();
        }
    }
}
