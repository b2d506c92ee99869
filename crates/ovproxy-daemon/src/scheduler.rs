//! Deferred callbacks for the connection manager.
//!
//! The manager never sleeps. It arms named timers through [`Scheduler`]; when
//! one fires, the runtime posts a `TimerFired` event back onto the manager's
//! queue and the manager confirms it with [`Scheduler::acknowledge`] before
//! acting, so a firing that raced a cancel is dropped.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

/// The manager's timers. Each kind has at most one pending instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// Bind reported success; the connection callback must arrive before this fires.
    DeferredConnection,
    /// Backoff reconnect.
    Reconnect,
}

impl TimerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeferredConnection => "deferred_connection",
            Self::Reconnect => "reconnect",
        }
    }
}

/// Identifies one arming of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(pub u64);

pub trait Scheduler {
    /// Arm `timer` to fire after `delay`, replacing any pending instance.
    fn schedule(&mut self, timer: TimerKind, delay: Duration) -> TimerToken;

    /// Disarm `timer`. No-op if it is not pending.
    fn cancel(&mut self, timer: TimerKind);

    fn is_pending(&self, timer: TimerKind) -> bool;

    /// Consume a firing. Returns `false` if `token` was cancelled or replaced.
    fn acknowledge(&mut self, timer: TimerKind, token: TimerToken) -> bool;
}

// ─── Manual scheduler ────────────────────────────────────────────

/// Scheduler on an explicit virtual clock.
///
/// Nothing fires by itself: the owner advances the clock and feeds due timers
/// back to the manager (see `ProxyConnectionManager::advance_clock`).
#[derive(Debug, Default)]
pub struct ManualScheduler {
    now: Duration,
    next_token: u64,
    armed: HashMap<TimerKind, (TimerToken, Duration)>,
    /// Every `schedule` call as (kind, delay), oldest first.
    history: Vec<(TimerKind, Duration)>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    /// Move the clock. Does not fire anything.
    pub fn set_now(&mut self, now: Duration) {
        self.now = now;
    }

    /// Earliest armed timer due at or before `until`.
    pub fn next_due(&self, until: Duration) -> Option<(TimerKind, TimerToken, Duration)> {
        self.armed
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= until)
            .min_by_key(|(_, (token, deadline))| (*deadline, token.0))
            .map(|(kind, (token, deadline))| (*kind, *token, *deadline))
    }

    /// Absolute deadline of a pending timer.
    pub fn deadline(&self, timer: TimerKind) -> Option<Duration> {
        self.armed.get(&timer).map(|(_, deadline)| *deadline)
    }

    pub fn pending_count(&self) -> usize {
        self.armed.len()
    }

    pub fn history(&self) -> &[(TimerKind, Duration)] {
        &self.history
    }

    /// Delays passed to `schedule` for one timer kind, oldest first.
    pub fn delays_for(&self, timer: TimerKind) -> Vec<Duration> {
        self.history
            .iter()
            .filter(|(kind, _)| *kind == timer)
            .map(|(_, delay)| *delay)
            .collect()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&mut self, timer: TimerKind, delay: Duration) -> TimerToken {
        self.next_token += 1;
        let token = TimerToken(self.next_token);
        self.armed.insert(timer, (token, self.now + delay));
        self.history.push((timer, delay));
        token
    }

    fn cancel(&mut self, timer: TimerKind) {
        self.armed.remove(&timer);
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
