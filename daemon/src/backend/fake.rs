//! Scripted stand-ins for the recognition backends
//!
//! Used by tests for failure injection and by the daemon's simulate mode,
//! where cycling scripts replace the camera/microphone models.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    BackendError, CommandInterpreter, CommandLabel, GestureLabel, GestureReading,
    ImageClassifier, SpeechPipeline, VoiceCommand,
};

/// Ordered replies; once drained either cycles or keeps answering `fallback`
struct Script<T: Clone> {
    pending: VecDeque<T>,
    played: Vec<T>,
    cycle: bool,
    fallback: T,
}

impl<T: Clone> Script<T> {
    fn new(steps: Vec<T>, fallback: T, cycle: bool) -> Self {
        Self {
            pending: steps.into(),
            played: Vec::new(),
            cycle,
            fallback,
        }
    }

    fn next(&mut self) -> T {
        if self.pending.is_empty() && self.cycle && !self.played.is_empty() {
            self.pending = std::mem::take(&mut self.played).into();
        }
        match self.pending.pop_front() {
            Some(step) => {
                if self.cycle {
                    self.played.push(step.clone());
                }
                step
            }
            None => self.fallback.clone(),
        }
    }
}

/// Shared bookkeeping for every fake: reply script, call counter, latency
struct Scripted<T: Clone> {
    script: Mutex<Script<Result<T, BackendError>>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl<T: Clone> Scripted<T> {
    fn new(steps: Vec<Result<T, BackendError>>, fallback: Result<T, BackendError>, cycle: bool) -> Self {
        Self {
            script: Mutex::new(Script::new(steps, fallback, cycle)),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    async fn reply(&self) -> Result<T, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.script.lock().next();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        reply
    }
}

/// Image classifier replaying scripted readings
pub struct ScriptedClassifier {
    inner: Scripted<GestureReading>,
}

impl ScriptedClassifier {
    /// Replay `steps`, then report no hand
    pub fn new(steps: Vec<Result<GestureReading, BackendError>>) -> Self {
        Self {
            inner: Scripted::new(steps, Ok(GestureReading::default()), false),
        }
    }

    /// Replay `steps` forever
    pub fn cycling(steps: Vec<Result<GestureReading, BackendError>>) -> Self {
        Self {
            inner: Scripted::new(steps, Ok(GestureReading::default()), true),
        }
    }

    /// Fail every request with `err`
    pub fn failing(err: BackendError) -> Self {
        Self {
            inner: Scripted::new(Vec::new(), Err(err), false),
        }
    }

    /// Hold every reply for `delay` before returning it
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.inner.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageClassifier for ScriptedClassifier {
    async fn classify(&self, _frame: &[u8]) -> Result<GestureReading, BackendError> {
        self.inner.reply().await
    }
}

/// Speech pipeline replaying scripted transcripts
pub struct ScriptedSpeech {
    inner: Scripted<String>,
}

impl ScriptedSpeech {
    /// Replay `steps`, then hear silence
    pub fn new(steps: Vec<Result<String, BackendError>>) -> Self {
        Self {
            inner: Scripted::new(steps, Ok(String::new()), false),
        }
    }

    pub fn cycling(steps: Vec<Result<String, BackendError>>) -> Self {
        Self {
            inner: Scripted::new(steps, Ok(String::new()), true),
        }
    }

    pub fn failing(err: BackendError) -> Self {
        Self {
            inner: Scripted::new(Vec::new(), Err(err), false),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.inner.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechPipeline for ScriptedSpeech {
    async fn transcribe(&self, _clip: &[u8]) -> Result<String, BackendError> {
        self.inner.reply().await
    }
}

/// Command interpreter replaying scripted commands, ignoring the transcript
pub struct ScriptedInterpreter {
    inner: Scripted<VoiceCommand>,
}

impl ScriptedInterpreter {
    pub fn failing(err: BackendError) -> Self {
        Self {
            inner: Scripted::new(Vec::new(), Err(err), false),
        }
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandInterpreter for ScriptedInterpreter {
    async fn interpret(&self, _transcript: &str) -> Result<VoiceCommand, BackendError> {
        self.inner.reply().await
    }
}

/// Offline interpreter matching the documented command phrasings by keyword
#[derive(Debug, Default)]
pub struct KeywordInterpreter;

impl KeywordInterpreter {
    pub fn parse(transcript: &str) -> VoiceCommand {
        let text = transcript.trim().trim_end_matches(['.', '!', '?']);
        let lower = text.to_ascii_lowercase();

        if let Some(rest) = lower.strip_prefix("call ") {
            // keep the caller's casing for the name
            let params = &text[text.len() - rest.len()..];
            return VoiceCommand::new(CommandLabel::Call, params);
        }
        if lower == "call" {
            return VoiceCommand::bare(CommandLabel::Call);
        }
        if lower.starts_with("save") {
            return VoiceCommand::bare(CommandLabel::Save);
        }
        if lower.starts_with("delete") || lower.starts_with("clear") {
            return VoiceCommand::bare(CommandLabel::Delete);
        }
        if lower.starts_with("block") {
            return VoiceCommand::bare(CommandLabel::Block);
        }
        VoiceCommand::default()
    }
}

#[async_trait]
impl CommandInterpreter for KeywordInterpreter {
    async fn interpret(&self, transcript: &str) -> Result<VoiceCommand, BackendError> {
        Ok(Self::parse(transcript))
    }
}

const SIMULATED_LATENCY: Duration = Duration::from_millis(400);

/// Cycling classifier used by simulate mode
pub fn simulated_classifier() -> ScriptedClassifier {
    let no_hand = GestureReading::default();
    ScriptedClassifier::cycling(vec![
        Ok(no_hand),
        Ok(GestureReading::new(true, GestureLabel::None)),
        Ok(GestureReading::new(true, GestureLabel::Save)),
        Ok(no_hand),
        Ok(GestureReading::new(true, GestureLabel::Delete)),
        Ok(no_hand),
        Ok(GestureReading::new(true, GestureLabel::Call)),
        Ok(GestureReading::new(true, GestureLabel::Hangup)),
    ])
    .with_delay(SIMULATED_LATENCY)
}

/// Cycling transcripts used by simulate mode
pub fn simulated_speech() -> ScriptedSpeech {
    let silence = || Ok(String::new());
    ScriptedSpeech::cycling(vec![
        silence(),
        silence(),
        Ok("hey genie".to_string()),
        Ok("Call John".to_string()),
        silence(),
        Ok("start call".to_string()),
        Ok("Call 555-1234".to_string()),
        silence(),
        Ok("voice command".to_string()),
        Ok("Save this contact".to_string()),
        silence(),
        Ok("call genie".to_string()),
        Ok("Block this caller".to_string()),
    ])
    .with_delay(SIMULATED_LATENCY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_then_fallback() {
        let classifier = ScriptedClassifier::new(vec![
            Ok(GestureReading::new(true, GestureLabel::Call)),
            Err(BackendError::Unavailable("down".into())),
        ]);

        assert_eq!(
            classifier.classify(&[]).await,
            Ok(GestureReading::new(true, GestureLabel::Call))
        );
        assert!(classifier.classify(&[]).await.is_err());
        assert_eq!(classifier.classify(&[]).await, Ok(GestureReading::default()));
        assert_eq!(classifier.calls(), 3);
    }

    #[tokio::test]
    async fn test_cycling_repeats() {
        let speech = ScriptedSpeech::cycling(vec![Ok("a".into()), Ok("b".into())]);
        let mut heard = Vec::new();
        for _ in 0..5 {
            heard.push(speech.transcribe(&[]).await.unwrap());
        }
        assert_eq!(heard, vec!["a", "b", "a", "b", "a"]);
    }

    #[tokio::test]
    async fn test_failing_always_fails() {
        let interpreter = ScriptedInterpreter::failing(BackendError::Timeout(Duration::from_secs(1)));
        for _ in 0..3 {
            assert!(interpreter.interpret("call john").await.is_err());
        }
        assert_eq!(interpreter.calls(), 3);
    }

    #[test]
    fn test_keyword_interpreter_documented_examples() {
        assert_eq!(
            KeywordInterpreter::parse("Call John"),
            VoiceCommand::new(CommandLabel::Call, "John")
        );
        assert_eq!(
            KeywordInterpreter::parse("Call 555-1234"),
            VoiceCommand::new(CommandLabel::Call, "555-1234")
        );
        assert_eq!(
            KeywordInterpreter::parse("Save this contact"),
            VoiceCommand::bare(CommandLabel::Save)
        );
        assert_eq!(
            KeywordInterpreter::parse("Delete this number."),
            VoiceCommand::bare(CommandLabel::Delete)
        );
        assert_eq!(
            KeywordInterpreter::parse("Block this caller"),
            VoiceCommand::bare(CommandLabel::Block)
        );
        assert_eq!(KeywordInterpreter::parse("what time is it"), VoiceCommand::default());
    }
}
