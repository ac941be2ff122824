//! Microphone voice sampler
//!
//! Two regimes share the microphone and one busy flag:
//! - trigger listening while voice mode is off and always-listening is on:
//!   short clips, transcribed and matched against the trigger phrases
//! - command listening while voice mode is on: one longer clip, transcribed
//!   and interpreted; after one interpreted command the sampler asks the
//!   arbiter to release voice mode. A silent clip counts as a failed attempt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::{bounded, drive, BusyFlag, SampleError, SamplerChannel};
use crate::backend::{CommandInterpreter, SpeechPipeline, VoiceCommand};
use crate::capture::ClipSource;
use crate::dispatch::{CommandSink, DetectedCommand};
use crate::mode::{InputMode, ModeSnapshot, ModeTrigger};

/// Timing and vocabulary for the voice channel
#[derive(Debug, Clone)]
pub struct VoiceSettings {
    pub trigger_period: Duration,
    pub trigger_clip: Duration,
    pub command_period: Duration,
    pub command_clip: Duration,
    pub request_timeout: Duration,
    /// Failed command attempts tolerated per activation
    pub retry_limit: u32,
    pub trigger_phrases: Vec<String>,
    /// Listen for trigger phrases while voice mode is off
    pub always_listening: bool,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            trigger_period: Duration::from_secs(4),
            trigger_clip: Duration::from_secs(3),
            command_period: Duration::from_secs(6),
            command_clip: Duration::from_secs(5),
            request_timeout: Duration::from_secs(8),
            retry_limit: 3,
            trigger_phrases: ["start call", "hey genie", "voice command", "call genie"]
                .into_iter()
                .map(String::from)
                .collect(),
            always_listening: true,
        }
    }
}

impl VoiceSettings {
    /// First trigger phrase contained in `transcript`, case-insensitively
    pub fn match_trigger(&self, transcript: &str) -> Option<&str> {
        let heard = transcript.to_lowercase();
        self.trigger_phrases
            .iter()
            .find(|phrase| !phrase.is_empty() && heard.contains(&phrase.to_lowercase()))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VoiceRegime {
    /// Background trigger-phrase listening
    Trigger,
    /// Single-shot command capture
    Command,
}

/// Periodic microphone transcriber feeding the arbiter and dispatcher
pub struct VoiceSampler {
    speech: Arc<dyn SpeechPipeline>,
    interpreter: Arc<dyn CommandInterpreter>,
    microphone: Arc<dyn ClipSource>,
    sink: Arc<dyn CommandSink>,
    trigger_tx: mpsc::Sender<ModeTrigger>,
    mode_rx: watch::Receiver<ModeSnapshot>,
    settings: VoiceSettings,
    /// (activation epoch, consecutive failed command attempts)
    failures: Mutex<(u64, u32)>,
    listening: Arc<watch::Sender<bool>>,
    busy: BusyFlag,
}

impl VoiceSampler {
    pub fn new(
        speech: Arc<dyn SpeechPipeline>,
        interpreter: Arc<dyn CommandInterpreter>,
        microphone: Arc<dyn ClipSource>,
        sink: Arc<dyn CommandSink>,
        trigger_tx: mpsc::Sender<ModeTrigger>,
        mode_rx: watch::Receiver<ModeSnapshot>,
        settings: VoiceSettings,
    ) -> Self {
        let (listening, _) = watch::channel(settings.always_listening);
        Self {
            speech,
            interpreter,
            microphone,
            sink,
            trigger_tx,
            mode_rx,
            settings,
            failures: Mutex::new((0, 0)),
            listening: Arc::new(listening),
            busy: BusyFlag::default(),
        }
    }

    /// Runtime switch for background trigger listening
    pub fn listening_switch(&self) -> Arc<watch::Sender<bool>> {
        Arc::clone(&self.listening)
    }

    /// Sample until the arbiter goes away
    pub async fn run(self) {
        let mode_rx = self.mode_rx.clone();
        drive(Arc::new(self), mode_rx).await;
    }

    fn is_stale(&self, snapshot: ModeSnapshot) -> bool {
        let current_epoch = self.mode_rx.borrow().epoch;
        current_epoch != snapshot.epoch
    }

    async fn send_trigger(&self, trigger: ModeTrigger) {
        if self.trigger_tx.send(trigger).await.is_err() {
            warn!("mode arbiter gone, dropping voice trigger");
        }
    }

    async fn transcribe(&self, length: Duration) -> Result<String, SampleError> {
        let clip = self.microphone.record_clip(length).await?;
        Ok(self.speech.transcribe(&clip).await?)
    }

    async fn capture_command(&self) -> Result<VoiceCommand, SampleError> {
        let transcript = self.transcribe(self.settings.command_clip).await?;
        if transcript.trim().is_empty() {
            return Err(SampleError::Silence);
        }
        info!(%transcript, "command heard");
        Ok(self.interpreter.interpret(&transcript).await?)
    }

    async fn listen_for_trigger(&self, snapshot: ModeSnapshot) {
        let bound = self.settings.trigger_clip + self.settings.request_timeout;
        let transcript = match bounded(bound, self.transcribe(self.settings.trigger_clip)).await {
            Ok(transcript) => transcript,
            Err(e) => {
                warn!(error = %e, "trigger listening tick failed, skipping");
                return;
            }
        };

        // a phrase still counts if only gesture mode came or went meanwhile
        let voice_on = self.mode_rx.borrow().mode == InputMode::VoiceActive;
        if voice_on {
            debug!(%transcript, "voice mode entered during transcription, discarding");
            return;
        }

        if let Some(phrase) = self.settings.match_trigger(&transcript) {
            info!(%phrase, "trigger phrase heard");
            self.send_trigger(ModeTrigger::VoiceTriggered {
                transcript,
                epoch: snapshot.epoch,
            })
            .await;
        }
    }

    async fn listen_for_command(&self, snapshot: ModeSnapshot) {
        let bound = self.settings.command_clip + self.settings.request_timeout * 2;
        let result = bounded(bound, self.capture_command()).await;

        if self.is_stale(snapshot) {
            debug!("voice mode changed during capture, discarding");
            return;
        }

        match result {
            Ok(command) => {
                debug!(command = %command.command, params = ?command.params, "command interpreted");
                self.sink.submit(DetectedCommand::voice(command, snapshot.epoch));
                self.send_trigger(ModeTrigger::ReleaseVoice {
                    epoch: snapshot.epoch,
                })
                .await;
            }
            Err(e) => {
                let attempts = {
                    let mut failures = self.failures.lock();
                    if failures.0 != snapshot.epoch {
                        *failures = (snapshot.epoch, 0);
                    }
                    failures.1 += 1;
                    failures.1
                };

                if attempts >= self.settings.retry_limit {
                    warn!(error = %e, attempts, "command capture keeps failing, releasing voice mode");
                    self.send_trigger(ModeTrigger::ReleaseVoice {
                        epoch: snapshot.epoch,
                    })
                    .await;
                } else {
                    warn!(error = %e, attempts, "command capture failed, retrying next tick");
                }
            }
        }
    }
}

#[async_trait]
impl SamplerChannel for VoiceSampler {
    type Regime = VoiceRegime;

    const NAME: &'static str = "voice";

    fn regime(&self, mode: InputMode) -> Option<(VoiceRegime, Duration)> {
        match mode {
            InputMode::VoiceActive => Some((VoiceRegime::Command, self.settings.command_period)),
            InputMode::Idle | InputMode::GestureActive => (*self.listening.borrow())
                .then_some((VoiceRegime::Trigger, self.settings.trigger_period)),
        }
    }

    fn busy(&self) -> &BusyFlag {
        &self.busy
    }

    fn regime_switch(&self) -> Option<watch::Receiver<bool>> {
        Some(self.listening.subscribe())
    }

    async fn tick(self: Arc<Self>, regime: VoiceRegime, snapshot: ModeSnapshot) {
        match regime {
            VoiceRegime::Trigger => self.listen_for_trigger(snapshot).await,
            VoiceRegime::Command => self.listen_for_command(snapshot).await,
        }
    }
}
