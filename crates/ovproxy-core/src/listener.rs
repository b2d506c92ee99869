//! Observers of the overview proxy connection.
//!
//! Listeners implement only the callbacks they care about; every method has a
//! no-op default. The registry is owned by the connection manager and is only
//! ever touched from its serialized queue.

use std::fmt;

use crate::types::{AssistantBundle, InteractionFlags, MotionEvent};

/// Callbacks fired by the connection manager.
pub trait OverviewProxyListener: Send {
    fn on_connection_changed(&mut self, _is_connected: bool) {}
    fn on_quick_step_started(&mut self) {}
    fn on_interaction_flags_changed(&mut self, _flags: InteractionFlags) {}
    fn on_overview_shown(&mut self, _from_home: bool) {}
    fn on_quick_scrub_started(&mut self) {}
    fn on_back_button_alpha_changed(&mut self, _alpha: f32, _animate: bool) {}
    fn on_assistant_progress(&mut self, _progress: f32) {}
    fn start_assistant(&mut self, _bundle: &AssistantBundle) {}
    fn on_status_bar_motion_event(&mut self, _event: &MotionEvent) {}
    fn on_screen_pinning_requested(&mut self, _task_id: i32) {}
    fn on_split_screen_invoked(&mut self) {}
}

/// One fan-out event, in the order it was raised.
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyEvent {
    ConnectionChanged(bool),
    QuickStepStarted,
    InteractionFlagsChanged(InteractionFlags),
    OverviewShown { from_home: bool },
    QuickScrubStarted,
    BackButtonAlphaChanged { alpha: f32, animate: bool },
    AssistantProgress(f32),
    StartAssistant(AssistantBundle),
    StatusBarMotionEvent(MotionEvent),
    ScreenPinningRequested { task_id: i32 },
    SplitScreenInvoked,
}

impl ProxyEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionChanged(_) => "connection_changed",
            Self::QuickStepStarted => "quick_step_started",
            Self::InteractionFlagsChanged(_) => "interaction_flags_changed",
            Self::OverviewShown { .. } => "overview_shown",
            Self::QuickScrubStarted => "quick_scrub_started",
            Self::BackButtonAlphaChanged { .. } => "back_button_alpha_changed",
            Self::AssistantProgress(_) => "assistant_progress",
            Self::StartAssistant(_) => "start_assistant",
            Self::StatusBarMotionEvent(_) => "status_bar_motion_event",
            Self::ScreenPinningRequested { .. } => "screen_pinning_requested",
            Self::SplitScreenInvoked => "split_screen_invoked",
        }
    }

    /// Invoke the matching callback on `listener`.
    pub fn deliver(&self, listener: &mut dyn OverviewProxyListener) {
        match self {
            Self::ConnectionChanged(connected) => listener.on_connection_changed(*connected),
            Self::QuickStepStarted => listener.on_quick_step_started(),
            Self::InteractionFlagsChanged(flags) => listener.on_interaction_flags_changed(*flags),
            Self::OverviewShown { from_home } => listener.on_overview_shown(*from_home),
            Self::QuickScrubStarted => listener.on_quick_scrub_started(),
            Self::BackButtonAlphaChanged { alpha, animate } => {
                listener.on_back_button_alpha_changed(*alpha, *animate)
            }
            Self::AssistantProgress(progress) => listener.on_assistant_progress(*progress),
            Self::StartAssistant(bundle) => listener.start_assistant(bundle),
            Self::StatusBarMotionEvent(event) => listener.on_status_bar_motion_event(event),
            Self::ScreenPinningRequested { task_id } => {
                listener.on_screen_pinning_requested(*task_id)
            }
            Self::SplitScreenInvoked => listener.on_split_screen_invoked(),
        }
    }
}

/// Handle returned by [`ListenerRegistry::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Registered observers, dispatched newest-first.
#[derive(Default)]
pub struct ListenerRegistry {
    entries: Vec<(ListenerId, Box<dyn OverviewProxyListener>)>,
    next_id: u64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, listener: Box<dyn OverviewProxyListener>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    /// Returns the listener if it was registered.
    pub fn remove(&mut self, id: ListenerId) -> Option<Box<dyn OverviewProxyListener>> {
        let pos = self.entries.iter().position(|(entry_id, _)| *entry_id == id)?;
        Some(self.entries.remove(pos).1)
    }

    /// Deliver `event` to every listener, last registered first.
    pub fn dispatch(&mut self, event: &ProxyEvent) {
        for (_, listener) in self.entries.iter_mut().rev() {
            event.deliver(listener.as_mut());
        }
    }

    /// Deliver `event` to a single listener. Returns `false` if `id` is unknown.
    pub fn deliver_to(&mut self, id: ListenerId, event: &ProxyEvent) -> bool {
        match self.entries.iter_mut().find(|(entry_id, _)| *entry_id == id) {
            Some((_, listener)) => {
                event.deliver(listener.as_mut());
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("len", &self.entries.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records callbacks as "<tag>:<event>" strings into a shared log.
    struct Recorder {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl OverviewProxyListener for Recorder {
        fn on_connection_changed(&mut self, is_connected: bool) {
            self.push(format!("connected={is_connected}"));
        }
        fn on_overview_shown(&mut self, from_home: bool) {
            self.push(format!("overview_shown={from_home}"));
        }
    }

    impl Recorder {
        fn push(&self, entry: String) {
            self.log
                .lock()
                .expect("log lock")
                .push(format!("{}:{entry}", self.tag));
        }
    }

    fn recorder(tag: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Box<dyn OverviewProxyListener> {
        Box::new(Recorder {
            tag,
            log: Arc::clone(log),
        })
    }

    #[test]
    fn dispatch_runs_newest_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = ListenerRegistry::new();
        reg.add(recorder("a", &log));
        reg.add(recorder("b", &log));
        reg.dispatch(&ProxyEvent::ConnectionChanged(true));
        assert_eq!(
            *log.lock().expect("log lock"),
            vec!["b:connected=true", "a:connected=true"]
        );
    }

    #[test]
    fn unimplemented_callbacks_are_noops() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = ListenerRegistry::new();
        reg.add(recorder("a", &log));
        reg.dispatch(&ProxyEvent::QuickScrubStarted);
        reg.dispatch(&ProxyEvent::AssistantProgress(0.5));
        assert!(log.lock().expect("log lock").is_empty());
    }

    #[test]
    fn remove_stops_delivery() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = ListenerRegistry::new();
        let a = reg.add(recorder("a", &log));
        reg.add(recorder("b", &log));
        assert!(reg.remove(a).is_some());
        assert!(reg.remove(a).is_none());
        reg.dispatch(&ProxyEvent::OverviewShown { from_home: true });
        assert_eq!(*log.lock().expect("log lock"), vec!["b:overview_shown=true"]);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn deliver_to_targets_one_listener() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = ListenerRegistry::new();
        let a = reg.add(recorder("a", &log));
        reg.add(recorder("b", &log));
        assert!(reg.deliver_to(a, &ProxyEvent::ConnectionChanged(false)));
        assert_eq!(*log.lock().expect("log lock"), vec!["a:connected=false"]);
    }

    #[test]
    fn event_names_are_stable() {
        assert_eq!(ProxyEvent::SplitScreenInvoked.name(), "split_screen_invoked");
        assert_eq!(
            ProxyEvent::BackButtonAlphaChanged {
                alpha: 1.0,
                animate: false
            }
            .name(),
            "back_button_alpha_changed"
        );
    }
}
