//! Recognition backend contracts
//!
//! The samplers treat image classification, speech transcription and
//! command interpretation as black-box request/response services. Each
//! contract is a trait so the HTTP clients and the scripted fakes are
//! interchangeable.

pub mod fake;
mod llm;
mod speech;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use llm::{LlmClient, LlmCommandInterpreter, LlmGestureClassifier};
pub use speech::SttClient;

/// Hand gestures the classifier can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GestureLabel {
    /// Index finger extended
    Call,
    /// Open palm
    Hangup,
    /// Thumbs up
    Save,
    /// Closed fist
    Delete,
    /// No clear gesture, or no hand
    #[default]
    #[serde(other)]
    None,
}

impl GestureLabel {
    /// Lenient label parsing; anything unrecognised is `None`
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "call" => GestureLabel::Call,
            "hangup" | "hang_up" | "hang up" => GestureLabel::Hangup,
            "save" => GestureLabel::Save,
            "delete" => GestureLabel::Delete,
            _ => GestureLabel::None,
        }
    }
}

impl std::fmt::Display for GestureLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GestureLabel::Call => write!(f, "call"),
            GestureLabel::Hangup => write!(f, "hangup"),
            GestureLabel::Save => write!(f, "save"),
            GestureLabel::Delete => write!(f, "delete"),
            GestureLabel::None => write!(f, "none"),
        }
    }
}

/// One classifier verdict for a still frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GestureReading {
    #[serde(rename = "hand_detected")]
    pub hand_present: bool,
    #[serde(default)]
    pub gesture: GestureLabel,
}

impl GestureReading {
    pub fn new(hand_present: bool, gesture: GestureLabel) -> Self {
        Self {
            hand_present,
            gesture,
        }
    }

    /// Gesture worth acting on, if any
    pub fn actionable(&self) -> Option<GestureLabel> {
        match (self.hand_present, self.gesture) {
            (true, GestureLabel::None) | (false, _) => None,
            (true, gesture) => Some(gesture),
        }
    }
}

/// Commands the interpreter can extract from a transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandLabel {
    Call,
    Save,
    Delete,
    Block,
    #[default]
    #[serde(other)]
    None,
}

impl CommandLabel {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "call" => CommandLabel::Call,
            "save" => CommandLabel::Save,
            "delete" => CommandLabel::Delete,
            "block" => CommandLabel::Block,
            _ => CommandLabel::None,
        }
    }
}

impl std::fmt::Display for CommandLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandLabel::Call => write!(f, "call"),
            CommandLabel::Save => write!(f, "save"),
            CommandLabel::Delete => write!(f, "delete"),
            CommandLabel::Block => write!(f, "block"),
            CommandLabel::None => write!(f, "none"),
        }
    }
}

/// Interpreted voice command with its optional parameter
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VoiceCommand {
    #[serde(default)]
    pub command: CommandLabel,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub params: Option<String>,
}

impl VoiceCommand {
    pub fn new(command: CommandLabel, params: impl Into<String>) -> Self {
        let params = params.into();
        let params = params.trim();
        Self {
            command,
            params: (!params.is_empty()).then(|| params.to_string()),
        }
    }

    pub fn bare(command: CommandLabel) -> Self {
        Self {
            command,
            params: None,
        }
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

/// Failures of a single backend round trip
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed backend response: {0}")]
    MalformedResponse(String),
}

/// Classifies one still frame into hand presence and a gesture
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    async fn classify(&self, frame: &[u8]) -> Result<GestureReading, BackendError>;
}

/// Transcribes one audio clip to text
#[async_trait]
pub trait SpeechPipeline: Send + Sync {
    async fn transcribe(&self, clip: &[u8]) -> Result<String, BackendError>;
}

/// Maps a transcript to a structured command
#[async_trait]
pub trait CommandInterpreter: Send + Sync {
    async fn interpret(&self, transcript: &str) -> Result<VoiceCommand, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_deserialization() {
        let json = r#"{"hand_detected": true, "gesture": "save"}"#;
        let reading: GestureReading = serde_json::from_str(json).unwrap();
        assert_eq!(reading, GestureReading::new(true, GestureLabel::Save));
    }

    #[test]
    fn test_unknown_gesture_is_none() {
        let json = r#"{"hand_detected": true, "gesture": "wave"}"#;
        let reading: GestureReading = serde_json::from_str(json).unwrap();
        assert_eq!(reading.gesture, GestureLabel::None);
        assert_eq!(reading.actionable(), None);
    }

    #[test]
    fn test_lenient_labels() {
        assert_eq!(GestureLabel::from_label(" Hangup "), GestureLabel::Hangup);
        assert_eq!(GestureLabel::from_label("thumbs"), GestureLabel::None);
        assert_eq!(CommandLabel::from_label("BLOCK"), CommandLabel::Block);
    }

    #[test]
    fn test_gesture_without_hand_is_not_actionable() {
        let reading = GestureReading::new(false, GestureLabel::Call);
        assert_eq!(reading.actionable(), None);
        let reading = GestureReading::new(true, GestureLabel::Hangup);
        assert_eq!(reading.actionable(), Some(GestureLabel::Hangup));
    }

    #[test]
    fn test_command_empty_params_become_none() {
        let json = r#"{"command": "save", "params": "  "}"#;
        let cmd: VoiceCommand = serde_json::from_str(json).unwrap();
        assert_eq!(cmd, VoiceCommand::bare(CommandLabel::Save));

        let cmd = VoiceCommand::new(CommandLabel::Call, " John ");
        assert_eq!(cmd.params.as_deref(), Some("John"));
    }
}
