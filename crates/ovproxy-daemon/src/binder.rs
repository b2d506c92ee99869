//! Seams to the overview service: binding and the remote proxy handle.

use std::fmt;

use ovproxy_core::types::{BackAction, InitParams, NavBarRegion, UserId};

use crate::error::{BindError, RemoteError};

/// Identifies one bind attempt. Events carrying a superseded id are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(pub u64);

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "binding#{}", self.0)
    }
}

/// Result of a bind request that did not raise an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// The service resolved; a connection event will follow asynchronously.
    Bound(BindingId),
    /// Nothing to bind to for this user.
    NotFound,
}

/// Binds to the overview service on behalf of a user.
///
/// Connection events (`ServiceConnected`, `BindingDied`, ...) are delivered
/// back to the manager as [`ManagerEvent`](crate::manager::ManagerEvent)s on
/// its queue, never by calling into it directly.
pub trait ServiceBinder {
    type Proxy: OverviewProxy;

    /// Whether an overview service can be resolved for `user` at all.
    fn is_available(&self, user: UserId) -> bool;

    /// Start binding. At most one binding is live; callers unbind first.
    fn bind(&mut self, user: UserId) -> Result<BindOutcome, BindError>;

    /// Drop the live binding, if any. No events for it are delivered after this.
    fn unbind(&mut self);
}

/// Handle to the overview service living in another process.
pub trait OverviewProxy {
    /// Arm the death observer. It fires at most once.
    fn link_to_death(&mut self) -> Result<(), RemoteError>;

    /// Disarm the death observer.
    fn unlink_to_death(&mut self);

    fn on_initialize(&self, params: &InitParams) -> Result<(), RemoteError>;

    fn on_back_action(&self, action: &BackAction) -> Result<(), RemoteError>;

    fn on_active_nav_bar_region_changes(&self, region: &NavBarRegion) -> Result<(), RemoteError>;

    fn on_assistant_visibility_changed(&self, visibility: f32) -> Result<(), RemoteError>;
}
