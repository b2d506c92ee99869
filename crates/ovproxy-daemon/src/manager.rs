//! Overview proxy connection manager.
//!
//! A single-threaded state machine. Every host callback (bind result, death
//! notice, timer, user switch, inbound call) arrives as an event on the
//! owner's serialized queue and is applied by [`ProxyConnectionManager::handle`]
//! or one of the call methods. Nothing here blocks or sleeps.
//!
//! Phases: `Disconnected → Binding → Connected → (Disconnected | Dead)`.
//! `Dead` runs cleanup and rebinds immediately; bind failures go through
//! exponential backoff.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use ovproxy_core::backoff::{BackoffPolicy, ConnectionBackoff, DEFAULT_DEFERRED_CONNECTION_MS};
use ovproxy_core::caller_guard::{CallerGuard, Verdict};
use ovproxy_core::gesture::PendingGesture;
use ovproxy_core::listener::{ListenerId, ListenerRegistry, OverviewProxyListener, ProxyEvent};
use ovproxy_core::types::{
    BackAction, ConnectionPhase, InitParams, InputMonitor, InteractionFlags, NavBarRegion, UserId,
};

use crate::binder::{BindOutcome, BindingId, OverviewProxy, ServiceBinder};
use crate::inbound::{SysUiCall, SysUiReply};
use crate::prefs::{PrefKey, PrefsStore};
use crate::scheduler::{ManualScheduler, Scheduler, TimerKind, TimerToken};

// ─── Configuration ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub backoff: BackoffPolicy,
    /// How long a bound service may take to deliver its connection.
    pub deferred_connection: Duration,
    pub init: InitParams,
    /// User in the foreground at startup.
    pub initial_user: UserId,
    /// Whether that user has finished setup.
    pub user_setup: bool,
    /// Three-button navigation; changes the default interaction flags.
    pub legacy_nav_mode: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            deferred_connection: Duration::from_millis(DEFAULT_DEFERRED_CONNECTION_MS),
            init: InitParams {
                window_corner_radius: 0.0,
                supports_rounded_corners: false,
                sysui_endpoint: String::new(),
            },
            initial_user: UserId::SYSTEM,
            user_setup: true,
            legacy_nav_mode: false,
        }
    }
}

// ─── Events ──────────────────────────────────────────────────────

/// Everything that can move the state machine, besides direct calls.
#[derive(Debug)]
pub enum ManagerEvent<P> {
    /// (Re)connect to the overview service for the current user.
    Connect,
    ServiceConnected { binding: BindingId, proxy: P },
    ServiceDisconnected { binding: BindingId },
    BindingDied { binding: BindingId },
    NullBinding { binding: BindingId },
    /// The death observer armed on the proxy fired.
    RemoteDied { binding: BindingId },
    TimerFired { timer: TimerKind, token: TimerToken },
    UserSwitched { user: UserId },
    UserSetupChanged { setup: bool },
    /// The overview service package was installed, updated or disabled.
    LauncherStateChanged,
}

// ─── State snapshots ─────────────────────────────────────────────

/// Connection bookkeeping, as seen from outside.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    pub bound_user: Option<UserId>,
    pub is_bound: bool,
    pub proxy_handle_valid: bool,
    pub backoff_attempts: u32,
    pub interaction_flags: InteractionFlags,
}

/// Full dump of manager state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyStatus {
    pub phase: ConnectionPhase,
    pub current_user: UserId,
    pub user_setup: bool,
    pub enabled: bool,
    pub bound_user: Option<UserId>,
    pub is_bound: bool,
    pub connected: bool,
    pub backoff_attempts: u32,
    pub next_backoff_ms: u64,
    pub interaction_flags: InteractionFlags,
    pub show_swipe_up_ui: bool,
    pub back_button_alpha: f32,
    pub pending_gesture: bool,
    pub gesture_monitors: usize,
    pub listeners: usize,
    pub deferred_timeout_pending: bool,
    pub reconnect_pending: bool,
    pub connected_since: Option<DateTime<Utc>>,
}

// ─── Manager ─────────────────────────────────────────────────────

pub struct ProxyConnectionManager<B, S, K>
where
    B: ServiceBinder,
{
    config: ManagerConfig,
    binder: B,
    scheduler: S,
    prefs: K,

    current_user: UserId,
    user_setup: bool,
    enabled: bool,

    phase: ConnectionPhase,
    binding: Option<BindingId>,
    proxy: Option<B::Proxy>,
    death_linked: bool,
    guard: CallerGuard,
    backoff: ConnectionBackoff,
    connected_since: Option<DateTime<Utc>>,

    interaction_flags: InteractionFlags,
    back_button_alpha: f32,
    nav_bar_region: Option<NavBarRegion>,
    gesture: PendingGesture,
    monitors: Vec<InputMonitor>,
    next_monitor_token: u64,

    listeners: ListenerRegistry,
}

impl<B, S, K> ProxyConnectionManager<B, S, K>
where
    B: ServiceBinder,
    S: Scheduler,
    K: PrefsStore,
{
    /// Build the manager. Does not connect; post [`ManagerEvent::Connect`].
    pub fn new(config: ManagerConfig, binder: B, scheduler: S, prefs: K) -> Self {
        let default_flags = InteractionFlags::default_for(config.legacy_nav_mode);
        let interaction_flags = prefs
            .get_int(PrefKey::QuickStepInteractionFlags)
            .and_then(|v| u32::try_from(v).ok())
            .map(InteractionFlags::from_bits_retain)
            .unwrap_or(default_flags);
        let current_user = config.initial_user;
        let enabled = binder.is_available(current_user);
        let backoff = ConnectionBackoff::new(config.backoff.clone());
        let user_setup = config.user_setup;

        Self {
            config,
            binder,
            scheduler,
            prefs,
            current_user,
            user_setup,
            enabled,
            phase: ConnectionPhase::Disconnected,
            binding: None,
            proxy: None,
            death_linked: false,
            guard: CallerGuard::new(),
            backoff,
            connected_since: None,
            interaction_flags,
            // The host starts with a back button until told otherwise.
            back_button_alpha: 1.0,
            nav_bar_region: None,
            gesture: PendingGesture::new(),
            monitors: Vec::new(),
            next_monitor_token: 0,
            listeners: ListenerRegistry::new(),
        }
    }

    /// Apply one event. This is the whole event → transition table.
    pub fn handle(&mut self, event: ManagerEvent<B::Proxy>) {
        match event {
            ManagerEvent::Connect => self.start_connection_to_current_user(),
            ManagerEvent::ServiceConnected { binding, proxy } => {
                self.on_service_connected(binding, proxy)
            }
            ManagerEvent::ServiceDisconnected { binding } => {
                self.on_connection_lost(binding, "service disconnected")
            }
            ManagerEvent::BindingDied { binding } => self.on_connection_lost(binding, "binding died"),
            ManagerEvent::NullBinding { binding } => self.on_connection_lost(binding, "null binding"),
            ManagerEvent::RemoteDied { binding } => self.on_remote_died(binding),
            ManagerEvent::TimerFired { timer, token } => self.on_timer_fired(timer, token),
            ManagerEvent::UserSwitched { user } => self.on_user_switched(user),
            ManagerEvent::UserSetupChanged { setup } => self.on_user_setup_changed(setup),
            ManagerEvent::LauncherStateChanged => self.on_launcher_state_changed(),
        }
    }

    // ── Connection lifecycle ────────────────────────────────────

    /// Tear down any existing binding and bind again for the current user.
    pub fn start_connection_to_current_user(&mut self) {
        self.disconnect_from_launcher_service();

        if !self.user_setup || !self.enabled {
            tracing::debug!(
                user = %self.current_user,
                user_setup = self.user_setup,
                enabled = self.enabled,
                "cannot attempt connection"
            );
            return;
        }

        self.scheduler.cancel(TimerKind::Reconnect);
        match self.binder.bind(self.current_user) {
            Ok(BindOutcome::Bound(binding)) => {
                tracing::debug!(user = %self.current_user, %binding, "binding overview service");
                self.binding = Some(binding);
                self.phase = ConnectionPhase::Binding;
                // Bound is not connected: make sure the connection actually arrives.
                self.scheduler
                    .schedule(TimerKind::DeferredConnection, self.config.deferred_connection);
            }
            Ok(BindOutcome::NotFound) => {
                tracing::warn!(user = %self.current_user, "overview service not found");
                self.retry_with_backoff();
            }
            Err(e) => {
                tracing::error!("unable to bind because of security error: {e}");
                self.retry_with_backoff();
            }
        }
    }

    fn disconnect_from_launcher_service(&mut self) {
        self.scheduler.cancel(TimerKind::DeferredConnection);

        if self.binding.take().is_some() {
            // Always unbind, even after a died or null binding.
            self.binder.unbind();
        }
        self.guard.clear();

        if let Some(mut proxy) = self.proxy.take() {
            if std::mem::take(&mut self.death_linked) {
                proxy.unlink_to_death();
            }
            self.connected_since = None;
            self.back_button_alpha = 1.0;
            self.dispatch(ProxyEvent::BackButtonAlphaChanged {
                alpha: 1.0,
                animate: false,
            });
            self.dispatch(ProxyEvent::ConnectionChanged(false));
        }

        self.phase = ConnectionPhase::Disconnected;
    }

    fn on_service_connected(&mut self, binding: BindingId, mut proxy: B::Proxy) {
        if self.binding != Some(binding) {
            tracing::debug!(%binding, "ignoring connection from superseded binding");
            return;
        }

        self.scheduler.cancel(TimerKind::DeferredConnection);
        self.scheduler.cancel(TimerKind::Reconnect);
        self.guard.bind(self.current_user);
        self.backoff.reset();
        self.phase = ConnectionPhase::Connected;
        self.connected_since = Some(Utc::now());

        if let Some(mut previous) = self.proxy.take() {
            if std::mem::take(&mut self.death_linked) {
                previous.unlink_to_death();
            }
        }

        match proxy.link_to_death() {
            Ok(()) => self.death_linked = true,
            Err(e) => tracing::error!("lost connection to overview service: {e}"),
        }

        if let Err(e) = proxy.on_initialize(&self.config.init) {
            // Calls from the service are refused until the next connect.
            self.guard.clear();
            tracing::error!("failed to call onInitialize(): {e}");
        }

        if let Some(region) = &self.nav_bar_region {
            if let Err(e) = proxy.on_active_nav_bar_region_changes(region) {
                tracing::error!("failed to call onActiveNavBarRegionChanges(): {e}");
            }
        }

        self.proxy = Some(proxy);
        tracing::info!(user = %self.current_user, %binding, "overview service connected");
        self.dispatch(ProxyEvent::ConnectionChanged(true));
    }

    fn on_connection_lost(&mut self, binding: BindingId, reason: &'static str) {
        if self.binding != Some(binding) {
            tracing::debug!(%binding, reason, "ignoring event from superseded binding");
            return;
        }
        tracing::warn!(%binding, "{reason}, try reconnecting");
        self.scheduler.cancel(TimerKind::DeferredConnection);
        self.guard.clear();
        self.phase = ConnectionPhase::Disconnected;
        self.retry_with_backoff();
    }

    fn on_remote_died(&mut self, binding: BindingId) {
        if self.binding != Some(binding) || !self.death_linked {
            tracing::debug!(%binding, "ignoring death notice without a live registration");
            return;
        }
        // The registration is spent; teardown must not unlink it again.
        self.death_linked = false;
        self.phase = ConnectionPhase::Dead;
        tracing::warn!(%binding, "overview service died");
        self.cleanup_after_death();
    }

    fn cleanup_after_death(&mut self) {
        if let Some(cancel) = self.gesture.take_cancel() {
            tracing::debug!("cancelling status bar gesture left open by the dead service");
            self.dispatch(ProxyEvent::StatusBarMotionEvent(cancel));
        }
        if !self.monitors.is_empty() {
            tracing::debug!(count = self.monitors.len(), "dropping gesture monitors");
            self.monitors.clear();
        }
        self.start_connection_to_current_user();
    }

    fn on_timer_fired(&mut self, timer: TimerKind, token: TimerToken) {
        if !self.scheduler.acknowledge(timer, token) {
            tracing::debug!(timer = timer.as_str(), "dropping stale timer");
            return;
        }
        match timer {
            TimerKind::DeferredConnection => {
                tracing::warn!(
                    "bind succeeded but the connection to the overview service timed out, trying again"
                );
                self.phase = ConnectionPhase::Disconnected;
                self.retry_with_backoff();
            }
            TimerKind::Reconnect => self.start_connection_to_current_user(),
        }
    }

    /// Schedule a reconnect after the current backoff delay, unless one is
    /// already pending.
    pub fn retry_with_backoff(&mut self) {
        if self.scheduler.is_pending(TimerKind::Reconnect) {
            return;
        }
        let delay = self.backoff.next_delay();
        self.scheduler.schedule(TimerKind::Reconnect, delay);
        tracing::warn!(
            attempt = self.backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            "failed to connect, will try again"
        );
    }

    // ── Host events ─────────────────────────────────────────────

    fn on_user_switched(&mut self, user: UserId) {
        tracing::info!(from = %self.current_user, to = %user, "user switched");
        self.current_user = user;
        self.enabled = self.binder.is_available(user);
        self.backoff.reset();
        self.start_connection_to_current_user();
    }

    fn on_user_setup_changed(&mut self, setup: bool) {
        self.user_setup = setup;
        if setup {
            self.start_connection_to_current_user();
        }
    }

    fn on_launcher_state_changed(&mut self) {
        self.enabled = self.binder.is_available(self.current_user);

        if !self.enabled {
            // An absent service cannot vouch for its old flags.
            let defaults = InteractionFlags::default_for(self.config.legacy_nav_mode);
            if let Err(e) = self.prefs.remove(PrefKey::QuickStepInteractionFlags) {
                tracing::warn!("failed to clear interaction flags: {e}");
            }
            if self.interaction_flags != defaults {
                self.interaction_flags = defaults;
                self.dispatch(ProxyEvent::InteractionFlagsChanged(defaults));
            }
        }

        // Reconnect now rather than waiting for a retry.
        self.start_connection_to_current_user();
    }

    // ── Inbound calls ───────────────────────────────────────────

    /// Apply a call from the overview service made by `caller`.
    ///
    /// Calls from any user other than the bound one are refused silently:
    /// nothing changes and the neutral default is returned.
    pub fn handle_inbound(&mut self, caller: UserId, call: SysUiCall) -> SysUiReply {
        if let Verdict::Rejected(rejection) = self.guard.verify(caller, call.method()) {
            tracing::warn!("{rejection}");
            return call.default_reply();
        }

        match call {
            SysUiCall::StartScreenPinning { task_id } => {
                self.dispatch(ProxyEvent::ScreenPinningRequested { task_id });
                SysUiReply::Unit
            }
            SysUiCall::OnStatusBarMotionEvent { event } => {
                self.gesture.observe(&event);
                self.dispatch(ProxyEvent::StatusBarMotionEvent(event));
                SysUiReply::Unit
            }
            SysUiCall::OnSplitScreenInvoked {} => {
                self.dispatch(ProxyEvent::SplitScreenInvoked);
                SysUiReply::Unit
            }
            SysUiCall::OnOverviewShown { from_home } => {
                self.dispatch(ProxyEvent::OverviewShown { from_home });
                SysUiReply::Unit
            }
            SysUiCall::SetInteractionState { flags } => {
                if self.interaction_flags != flags {
                    self.interaction_flags = flags;
                    self.dispatch(ProxyEvent::InteractionFlagsChanged(flags));
                }
                if let Err(e) = self
                    .prefs
                    .put_int(PrefKey::QuickStepInteractionFlags, i64::from(flags.bits()))
                {
                    tracing::warn!("failed to persist interaction flags: {e}");
                }
                SysUiReply::Unit
            }
            SysUiCall::SetBackButtonAlpha { alpha, animate } => {
                self.back_button_alpha = alpha;
                self.dispatch(ProxyEvent::BackButtonAlphaChanged { alpha, animate });
                SysUiReply::Unit
            }
            SysUiCall::GetWindowCornerRadius {} => {
                SysUiReply::CornerRadius(self.config.init.window_corner_radius)
            }
            SysUiCall::SupportsRoundedCornersOnWindows {} => {
                SysUiReply::RoundedCorners(self.config.init.supports_rounded_corners)
            }
            SysUiCall::OnAssistantProgress { progress } => {
                self.dispatch(ProxyEvent::AssistantProgress(progress));
                SysUiReply::Unit
            }
            SysUiCall::StartAssistant { bundle } => {
                self.dispatch(ProxyEvent::StartAssistant(bundle));
                SysUiReply::Unit
            }
            SysUiCall::MonitorGestureInput { name, display_id } => {
                self.next_monitor_token += 1;
                let monitor = InputMonitor {
                    name,
                    display_id,
                    token: self.next_monitor_token,
                };
                tracing::debug!(name = %monitor.name, display_id, "gesture monitor created");
                self.monitors.push(monitor.clone());
                SysUiReply::GestureMonitor(Some(monitor))
            }
        }
    }

    // ── Outbound calls ──────────────────────────────────────────

    pub fn notify_back_action(&self, action: &BackAction) {
        if let Some(proxy) = &self.proxy {
            if let Err(e) = proxy.on_back_action(action) {
                tracing::error!("failed to notify back action: {e}");
            }
        }
    }

    /// Remember the touchable nav bar region and forward it if connected.
    pub fn on_active_nav_bar_region_changes(&mut self, region: NavBarRegion) {
        if let Some(proxy) = &self.proxy {
            if let Err(e) = proxy.on_active_nav_bar_region_changes(&region) {
                tracing::error!("failed to call onActiveNavBarRegionChanges(): {e}");
            }
        }
        self.nav_bar_region = Some(region);
    }

    pub fn notify_assistant_visibility_changed(&self, visibility: f32) {
        if let Some(proxy) = &self.proxy {
            if let Err(e) = proxy.on_assistant_visibility_changed(visibility) {
                tracing::error!("failed to call onAssistantVisibilityChanged(): {e}");
            }
        }
    }

    pub fn notify_quick_step_started(&mut self) {
        self.dispatch(ProxyEvent::QuickStepStarted);
    }

    pub fn notify_quick_scrub_started(&mut self) {
        self.dispatch(ProxyEvent::QuickScrubStarted);
    }

    // ── Listeners ───────────────────────────────────────────────

    /// Register a listener. It immediately hears the current connection
    /// state and interaction flags.
    pub fn add_listener(&mut self, listener: Box<dyn OverviewProxyListener>) -> ListenerId {
        let id = self.listeners.add(listener);
        self.listeners
            .deliver_to(id, &ProxyEvent::ConnectionChanged(self.proxy.is_some()));
        self.listeners
            .deliver_to(id, &ProxyEvent::InteractionFlagsChanged(self.interaction_flags));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id).is_some()
    }

    fn dispatch(&mut self, event: ProxyEvent) {
        tracing::trace!(event = event.name(), "dispatch");
        self.listeners.dispatch(&event);
    }

    // ── Queries ─────────────────────────────────────────────────

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_connected(&self) -> bool {
        self.proxy.is_some()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn current_user(&self) -> UserId {
        self.current_user
    }

    pub fn interaction_flags(&self) -> InteractionFlags {
        self.interaction_flags
    }

    pub fn back_button_alpha(&self) -> f32 {
        self.back_button_alpha
    }

    pub fn should_show_swipe_up_ui(&self) -> bool {
        self.enabled && !self.interaction_flags.contains(InteractionFlags::DISABLE_SWIPE_UP)
    }

    pub fn proxy(&self) -> Option<&B::Proxy> {
        self.proxy.as_ref()
    }

    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState {
            phase: self.phase,
            bound_user: self.guard.bound_user(),
            is_bound: self.binding.is_some(),
            proxy_handle_valid: self.proxy.is_some(),
            backoff_attempts: self.backoff.attempts(),
            interaction_flags: self.interaction_flags,
        }
    }

    pub fn status(&self) -> ProxyStatus {
        ProxyStatus {
            phase: self.phase,
            current_user: self.current_user,
            user_setup: self.user_setup,
            enabled: self.enabled,
            bound_user: self.guard.bound_user(),
            is_bound: self.binding.is_some(),
            connected: self.proxy.is_some(),
            backoff_attempts: self.backoff.attempts(),
            next_backoff_ms: self.backoff.peek_delay().as_millis() as u64,
            interaction_flags: self.interaction_flags,
            show_swipe_up_ui: self.should_show_swipe_up_ui(),
            back_button_alpha: self.back_button_alpha,
            pending_gesture: self.gesture.is_pending(),
            gesture_monitors: self.monitors.len(),
            listeners: self.listeners.len(),
            deferred_timeout_pending: self.scheduler.is_pending(TimerKind::DeferredConnection),
            reconnect_pending: self.scheduler.is_pending(TimerKind::Reconnect),
            connected_since: self.connected_since,
        }
    }

    pub fn binder(&self) -> &B {
        &self.binder
    }

    pub fn binder_mut(&mut self) -> &mut B {
        &mut self.binder
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn prefs(&self) -> &K {
        &self.prefs
    }
}

impl<B, K> ProxyConnectionManager<B, ManualScheduler, K>
where
    B: ServiceBinder,
    K: PrefsStore,
{
    /// Advance the virtual clock, firing due timers in deadline order.
    pub fn advance_clock(&mut self, by: Duration) {
        let target = self.scheduler.now() + by;
        while let Some((timer, token, at)) = self.scheduler.next_due(target) {
            self.scheduler.set_now(at);
            self.handle(ManagerEvent::TimerFired { timer, token });
        }
        self.scheduler.set_now(target);
    }
}

// ─── Tests ───────────────────────────────────────────────────────
