//! Inbound calls from the overview service into the host.
//!
//! Wire shape is JSON-RPC style: `{"method": "<camelCase>", "params": {...}}`.
//! Methods without arguments still take an (empty) params object.

use serde::{Deserialize, Serialize};

use ovproxy_core::types::{AssistantBundle, InputMonitor, InteractionFlags, MotionEvent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum SysUiCall {
    StartScreenPinning {
        task_id: i32,
    },
    OnStatusBarMotionEvent {
        event: MotionEvent,
    },
    OnSplitScreenInvoked {},
    OnOverviewShown {
        from_home: bool,
    },
    SetInteractionState {
        flags: InteractionFlags,
    },
    SetBackButtonAlpha {
        alpha: f32,
        #[serde(default)]
        animate: bool,
    },
    GetWindowCornerRadius {},
    SupportsRoundedCornersOnWindows {},
    OnAssistantProgress {
        progress: f32,
    },
    StartAssistant {
        #[serde(default)]
        bundle: AssistantBundle,
    },
    MonitorGestureInput {
        name: String,
        display_id: i32,
    },
}

impl SysUiCall {
    /// Every inbound method name, as it appears on the wire.
    pub const METHODS: [&'static str; 11] = [
        "startScreenPinning",
        "onStatusBarMotionEvent",
        "onSplitScreenInvoked",
        "onOverviewShown",
        "setInteractionState",
        "setBackButtonAlpha",
        "getWindowCornerRadius",
        "supportsRoundedCornersOnWindows",
        "onAssistantProgress",
        "startAssistant",
        "monitorGestureInput",
    ];

    pub fn method(&self) -> &'static str {
        match self {
            Self::StartScreenPinning { .. } => "startScreenPinning",
            Self::OnStatusBarMotionEvent { .. } => "onStatusBarMotionEvent",
            Self::OnSplitScreenInvoked {} => "onSplitScreenInvoked",
            Self::OnOverviewShown { .. } => "onOverviewShown",
            Self::SetInteractionState { .. } => "setInteractionState",
            Self::SetBackButtonAlpha { .. } => "setBackButtonAlpha",
            Self::GetWindowCornerRadius {} => "getWindowCornerRadius",
            Self::SupportsRoundedCornersOnWindows {} => "supportsRoundedCornersOnWindows",
            Self::OnAssistantProgress { .. } => "onAssistantProgress",
            Self::StartAssistant { .. } => "startAssistant",
            Self::MonitorGestureInput { .. } => "monitorGestureInput",
        }
    }

    /// Reply handed to a caller that failed verification.
    pub fn default_reply(&self) -> SysUiReply {
        match self {
            Self::GetWindowCornerRadius {} => SysUiReply::CornerRadius(0.0),
            Self::SupportsRoundedCornersOnWindows {} => SysUiReply::RoundedCorners(false),
            Self::MonitorGestureInput { .. } => SysUiReply::GestureMonitor(None),
            _ => SysUiReply::Unit,
        }
    }
}

/// Reply to an inbound call. Serializes to the bare value (`null` for unit).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SysUiReply {
    Unit,
    CornerRadius(f32),
    RoundedCorners(bool),
    GestureMonitor(Option<InputMonitor>),
}
