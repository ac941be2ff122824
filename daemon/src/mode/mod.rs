//! Input mode arbitration
//!
//! Provides the single owner of the active input mode:
//! - Idle: neither channel is acting; the trigger listener runs
//! - GestureActive: the camera sampler drives gestures
//! - VoiceActive: the microphone captures one spoken command

mod arbiter;

pub use arbiter::{InputMode, ModeArbiter, ModeSnapshot, ModeTrigger};
