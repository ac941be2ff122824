//! Call-control collaborator
//!
//! Owns dial-pad state, the active call, contacts, call history and blocked
//! numbers. The dispatcher reads through [`CallContext`] and acts through
//! [`CallControl`]; it never holds call state itself.

mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use store::LocalCallControl;

/// A saved contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub phone_number: String,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub last_called: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Incoming,
    Outgoing,
    Missed,
}

/// One call-history entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallLog {
    pub id: String,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub phone_number: String,
    pub timestamp: DateTime<Utc>,
    /// Seconds
    #[serde(default)]
    pub duration: u64,
    #[serde(rename = "type")]
    pub direction: CallDirection,
}

/// The call session currently in progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveCall {
    pub log_id: String,
    pub number: String,
    pub name: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Errors reported by call control
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("{number} is already in your contacts as {name}")]
    ContactExists { number: String, name: String },

    #[error("no contact with id {0}")]
    ContactNotFound(String),

    #[error("no call log with id {0}")]
    CallLogNotFound(String),

    #[error("a call to {0} is already in progress")]
    CallInProgress(String),

    #[error("no active call")]
    NoActiveCall,

    #[error("nothing to dial")]
    NothingToDial,

    #[error("no number to block")]
    NothingToBlock,

    #[error("invalid dial-pad key {0:?}")]
    InvalidKey(char),

    #[error("failed to persist call data: {0}")]
    Persist(#[from] std::io::Error),

    #[error("failed to encode call data: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Read side of call control used to resolve command targets
pub trait CallContext {
    /// Number currently typed on the dial pad (may be empty)
    fn staged_number(&self) -> String;

    /// Newest call-history entry
    fn most_recent_call(&self) -> Option<CallLog>;

    /// First contact whose name contains `fragment`, case-insensitively
    fn find_contact_by_name(&self, fragment: &str) -> Option<Contact>;

    fn active_call(&self) -> Option<ActiveCall>;
}

/// Write side of call control
pub trait CallControl: CallContext + Send + Sync {
    fn dial(&self, number: &str) -> Result<ActiveCall, CallError>;

    fn hangup(&self) -> Result<CallLog, CallError>;

    fn save_contact(&self, number: &str, suggested_name: &str) -> Result<Contact, CallError>;

    /// Remove the last staged digit, returning what is left
    fn delete_last_digit(&self) -> String;

    fn clear_number(&self);

    fn block(&self, number: Option<&str>) -> Result<(), CallError>;
}

/// Digits of a phone number, ignoring formatting
pub fn digits_of(number: &str) -> String {
    number.chars().filter(char::is_ascii_digit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digits_of() {
        assert_eq!(digits_of("+1 (555) 123-4567"), "15551234567");
        assert_eq!(digits_of(""), "");
    }

    #[test]
    fn test_call_log_wire_names() {
        let log = CallLog {
            id: "1".into(),
            contact_id: None,
            name: Some("John Doe".into()),
            phone_number: "5551112222".into(),
            timestamp: Utc::now(),
            duration: 42,
            direction: CallDirection::Outgoing,
        };
        let json = serde_json::to_string(&log).unwrap();
        assert!(json.contains(r#""phoneNumber":"5551112222""#));
        assert!(json.contains(r#""type":"outgoing""#));
    }
}
