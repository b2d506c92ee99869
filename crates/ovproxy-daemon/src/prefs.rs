//! Persisted integer preferences.

use std::collections::HashMap;

use crate::error::PrefsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrefKey {
    /// Last interaction flags published by the overview service.
    QuickStepInteractionFlags,
}

impl PrefKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::QuickStepInteractionFlags => "quick_step_interaction_flags",
        }
    }
}

/// Storage that survives process restarts.
pub trait PrefsStore {
    fn get_int(&self, key: PrefKey) -> Option<i64>;

    fn put_int(&mut self, key: PrefKey, value: i64) -> Result<(), PrefsError>;

    fn remove(&mut self, key: PrefKey) -> Result<(), PrefsError>;
}

/// In-memory store. Nothing survives the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryPrefs {
    values: HashMap<PrefKey, i64>,
}

impl MemoryPrefs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_int(mut self, key: PrefKey, value: i64) -> Self {
        self.values.insert(key, value);
        self
    }
}

impl PrefsStore for MemoryPrefs {
    fn get_int(&self, key: PrefKey) -> Option<i64> {
        self.values.get(&key).copied()
    }

    fn put_int(&mut self, key: PrefKey, value: i64) -> Result<(), PrefsError> {
        self.values.insert(key, value);
        Ok(())
    }

    fn remove(&mut self, key: PrefKey) -> Result<(), PrefsError> {
        self.values.remove(&key);
        Ok(())
    }
}
