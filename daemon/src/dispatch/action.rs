//! Dispatcher inputs and outputs

use serde::{Deserialize, Serialize};

use crate::backend::{GestureLabel, VoiceCommand};
use crate::mode::InputMode;

/// Something a sampler recognised
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CommandInput {
    Gesture { gesture: GestureLabel },
    Voice(VoiceCommand),
}

impl CommandInput {
    /// Mode that must still be current for this input to count
    pub fn origin(&self) -> InputMode {
        match self {
            CommandInput::Gesture { .. } => InputMode::GestureActive,
            CommandInput::Voice(_) => InputMode::VoiceActive,
        }
    }
}

/// A recognised input stamped with the mode epoch it was captured under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedCommand {
    pub input: CommandInput,
    pub epoch: u64,
}

impl DetectedCommand {
    pub fn gesture(gesture: GestureLabel, epoch: u64) -> Self {
        Self {
            input: CommandInput::Gesture { gesture },
            epoch,
        }
    }

    pub fn voice(command: VoiceCommand, epoch: u64) -> Self {
        Self {
            input: CommandInput::Voice(command),
            epoch,
        }
    }
}

/// Call-control action handed to the collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallAction {
    Dial { number: String },
    Hangup,
    SaveContact { number: String, suggested_name: String },
    DeleteDigit,
    Block { number: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Dial,
    Hangup,
    SaveContact,
    DeleteDigit,
    Block,
}

impl CallAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            CallAction::Dial { .. } => ActionKind::Dial,
            CallAction::Hangup => ActionKind::Hangup,
            CallAction::SaveContact { .. } => ActionKind::SaveContact,
            CallAction::DeleteDigit => ActionKind::DeleteDigit,
            CallAction::Block { .. } => ActionKind::Block,
        }
    }

    /// Number or name fragment the action applies to
    pub fn target(&self) -> Option<&str> {
        match self {
            CallAction::Dial { number } | CallAction::SaveContact { number, .. } => Some(number),
            CallAction::Block { number } => number.as_deref(),
            CallAction::Hangup | CallAction::DeleteDigit => None,
        }
    }
}

impl std::fmt::Display for CallAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallAction::Dial { number } => write!(f, "DIAL {}", number),
            CallAction::Hangup => write!(f, "HANGUP"),
            CallAction::SaveContact { number, .. } => write!(f, "SAVE_CONTACT {}", number),
            CallAction::DeleteDigit => write!(f, "DELETE_DIGIT"),
            CallAction::Block { number: Some(number) } => write!(f, "BLOCK {}", number),
            CallAction::Block { number: None } => write!(f, "BLOCK"),
        }
    }
}
