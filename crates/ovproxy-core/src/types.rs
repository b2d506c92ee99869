use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

// ─── Errors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("invalid user id: {0}")]
    InvalidUser(String),
}

// ─── Users ────────────────────────────────────────────────────────

/// Size of the uid range reserved for each user.
pub const PER_USER_RANGE: u32 = 100_000;

/// Identifier of a user profile on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i32);

impl UserId {
    /// The system user, which owns the process at boot.
    pub const SYSTEM: Self = Self(0);

    /// Derive the user owning an OS uid.
    pub fn from_uid(uid: u32) -> Self {
        // u32::MAX / 100_000 fits in i32
        Self((uid / PER_USER_RANGE) as i32)
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().parse::<i32>() {
            Ok(id) if id >= 0 => Ok(Self(id)),
            _ => Err(CoreError::InvalidUser(s.to_owned())),
        }
    }
}

// ─── Interaction flags ────────────────────────────────────────────

bitflags! {
    /// Interaction state published by the overview service.
    ///
    /// Bits the host does not know about are retained as-is.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InteractionFlags: u32 {
        const DISABLE_SWIPE_UP = 0x1;
        const DISABLE_QUICK_SCRUB = 0x2;
        const SHOW_OVERVIEW_BUTTON = 0x4;
        const HIDE_BACK_BUTTON = 0x8;
    }
}

impl InteractionFlags {
    /// Flags applied before the overview service has said anything.
    ///
    /// Legacy (three-button) navigation has no swipe-up gesture and always
    /// shows the overview button.
    pub fn default_for(legacy_nav_mode: bool) -> Self {
        if legacy_nav_mode {
            Self::DISABLE_SWIPE_UP | Self::SHOW_OVERVIEW_BUTTON
        } else {
            Self::empty()
        }
    }
}

impl Serialize for InteractionFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for InteractionFlags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u32::deserialize(deserializer).map(Self::from_bits_retain)
    }
}

// ─── Connection phase ─────────────────────────────────────────────

/// Lifecycle phase of the connection to the overview service.
///
/// `Disconnected → Binding → Connected → (Disconnected | Dead)`; `Dead`
/// returns to `Disconnected` through cleanup.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Binding,
    Connected,
    Dead,
}

impl ConnectionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Binding => "binding",
            Self::Connected => "connected",
            Self::Dead => "dead",
        }
    }
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Payloads ─────────────────────────────────────────────────────

/// Parameters pushed to the overview service right after it connects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitParams {
    pub window_corner_radius: f32,
    pub supports_rounded_corners: bool,
    /// Where the overview service reaches back into the host.
    pub sysui_endpoint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionAction {
    Down,
    Move,
    Up,
    Cancel,
}

/// A single pointer event forwarded from the overview service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionEvent {
    pub action: MotionAction,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub event_time_ms: u64,
}

impl MotionEvent {
    /// Copy of this event with a different action.
    pub fn with_action(&self, action: MotionAction) -> Self {
        Self {
            action,
            ..self.clone()
        }
    }
}

/// A back gesture or back-button press reported to the overview service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackAction {
    pub completed: bool,
    pub down_x: i32,
    pub down_y: i32,
    pub is_button: bool,
    pub gesture_swipe_left: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// Area of the navigation bar that accepts touch input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavBarRegion {
    pub rects: Vec<Rect>,
}

/// Handle returned to the overview service by `monitorGestureInput`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputMonitor {
    pub name: String,
    pub display_id: i32,
    pub token: u64,
}

/// Opaque key/value payload carried by `startAssistant`.
pub type AssistantBundle = serde_json::Map<String, serde_json::Value>;
