//! Pending status-bar gesture tracking.
//!
//! The overview service forwards status-bar touches. If it dies between a
//! pointer-down and the matching up/cancel, the host must synthesize a cancel
//! so the status bar does not stay stuck mid-drag.

use crate::types::{MotionAction, MotionEvent};

/// At most one retained pointer-down awaiting its up/cancel.
#[derive(Debug, Clone, Default)]
pub struct PendingGesture {
    down: Option<MotionEvent>,
}

impl PendingGesture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a forwarded event. A down retains a copy (replacing any earlier
    /// one); an up or cancel releases it.
    pub fn observe(&mut self, event: &MotionEvent) {
        match event.action {
            MotionAction::Down => self.down = Some(event.clone()),
            MotionAction::Up | MotionAction::Cancel => self.down = None,
            MotionAction::Move => {}
        }
    }

    /// Release the retained down, returning it converted into a cancel.
    pub fn take_cancel(&mut self) -> Option<MotionEvent> {
        self.down
            .take()
            .map(|down| down.with_action(MotionAction::Cancel))
    }

    pub fn is_pending(&self) -> bool {
        self.down.is_some()
    }
}
