//! Events broadcast by the daemon
//!
//! Mode transitions, detections and dispatch outcomes, pushed to
//! subscribed IPC clients.

use serde::{Deserialize, Serialize};

use crate::dispatch::CallAction;

/// Events emitted by the arbiter, samplers and dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonEvent {
    /// Gesture sampling switched on
    GestureModeEntered,

    /// Gesture sampling switched off
    GestureModeExited {
        /// Duration in milliseconds that gesture mode was active
        duration_ms: u64,
    },

    /// Voice command capture switched on
    VoiceModeEntered,

    /// Voice command capture switched off
    VoiceModeExited {
        /// Duration in milliseconds that voice mode was active
        duration_ms: u64,
    },

    /// The camera started or stopped seeing a hand
    HandPresenceChanged { present: bool },

    /// A trigger phrase was heard by the background listener
    TriggerHeard { transcript: String },

    /// Background trigger listening was switched on or off
    AlwaysListeningChanged { enabled: bool },

    /// The dispatcher forwarded an action to call control
    ActionDispatched { action: CallAction },

    /// Call control rejected an action
    ActionFailed { action: CallAction, reason: String },

    /// Save was requested with nothing staged and no call history
    NoNumberToSave,
}

impl std::fmt::Display for DaemonEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonEvent::GestureModeEntered => write!(f, "GESTURE_MODE_ENTERED"),
            DaemonEvent::GestureModeExited { duration_ms } => {
                write!(f, "GESTURE_MODE_EXITED ({}ms)", duration_ms)
            }
            DaemonEvent::VoiceModeEntered => write!(f, "VOICE_MODE_ENTERED"),
            DaemonEvent::VoiceModeExited { duration_ms } => {
                write!(f, "VOICE_MODE_EXITED ({}ms)", duration_ms)
            }
            DaemonEvent::HandPresenceChanged { present } => {
                write!(f, "HAND_PRESENCE_CHANGED ({})", present)
            }
            DaemonEvent::TriggerHeard { transcript } => write!(f, "TRIGGER_HEARD ({:?})", transcript),
            DaemonEvent::AlwaysListeningChanged { enabled } => {
                write!(f, "ALWAYS_LISTENING_CHANGED ({})", enabled)
            }
            DaemonEvent::ActionDispatched { action } => write!(f, "ACTION_DISPATCHED ({})", action),
            DaemonEvent::ActionFailed { action, reason } => {
                write!(f, "ACTION_FAILED ({}: {})", action, reason)
            }
            DaemonEvent::NoNumberToSave => write!(f, "NO_NUMBER_TO_SAVE"),
        }
    }
}
