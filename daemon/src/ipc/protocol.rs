//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::call::{ActiveCall, CallError, CallLog, Contact};
use crate::events::DaemonEvent;
use crate::mode::InputMode;

/// Requests from UI to daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Subscribe to daemon event notifications
    Subscribe,

    /// Manual gesture-mode button
    ToggleGesture,

    /// Manual voice-mode button
    ToggleVoice,

    /// Turn background trigger-phrase listening on or off
    ToggleAlwaysListening,

    /// Dial-pad key press
    PressKey { key: char },

    DeleteDigit,

    ClearNumber,

    /// Dial `number`, or the staged number when absent
    Dial {
        #[serde(default)]
        number: Option<String>,
    },

    Hangup,

    ListContacts,

    AddContact { name: String, phone_number: String },

    UpdateContact { contact: Contact },

    DeleteContact { id: String },

    ToggleFavorite { id: String },

    ListCallLogs,

    DeleteCallLog { id: String },

    ClearCallLogs,

    ListBlocked,
}

/// Responses from daemon to UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current daemon status
    Status(DaemonStatus),

    /// Subscription confirmed
    Subscribed,

    /// Input mode after a manual toggle
    Mode { mode: InputMode },

    /// Trigger-listening switch after a toggle
    Listening { always_listening: bool },

    /// Dial-pad and active call state
    DialState {
        staged: String,
        active_call: Option<ActiveCall>,
    },

    Contacts { contacts: Vec<Contact> },

    CallLogs { call_logs: Vec<CallLog> },

    Blocked { numbers: Vec<String> },

    /// Request succeeded with nothing to report
    Ok,

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl From<CallError> for Response {
    fn from(err: CallError) -> Self {
        let code = match &err {
            CallError::ContactExists { .. } => "contact_exists",
            CallError::ContactNotFound(_) => "contact_not_found",
            CallError::CallLogNotFound(_) => "call_log_not_found",
            CallError::CallInProgress(_) => "call_in_progress",
            CallError::NoActiveCall => "no_active_call",
            CallError::NothingToDial => "nothing_to_dial",
            CallError::NothingToBlock => "nothing_to_block",
            CallError::InvalidKey(_) => "invalid_key",
            CallError::Persist(_) | CallError::Encode(_) => "storage",
        };
        Response::error(code, err.to_string())
    }
}

/// Push notification from daemon to UI (for subscribed clients)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Daemon event occurred
    Event { event: DaemonEvent },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Current input mode
    pub mode: InputMode,

    /// Transitions since startup
    pub epoch: u64,

    /// Whether scripted backends are in use
    pub simulate: bool,

    /// Whether trigger phrases are listened for outside voice mode
    pub always_listening: bool,

    pub staged_number: String,

    pub in_call: bool,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            mode: InputMode::default(),
            epoch: 0,
            simulate: false,
            always_listening: true,
            staged_number: String::new(),
            in_call: false,
            uptime_secs: 0,
        }
    }
}
