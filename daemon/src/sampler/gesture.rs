//! Camera gesture sampler
//!
//! While gesture mode is active, classifies one frame per period and hands
//! actionable gestures to the dispatcher. Hand-presence changes are reported
//! to the arbiter. An optional slower idle watch reports presence only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::{bounded, drive, BusyFlag, SampleError, SamplerChannel};
use crate::backend::{GestureReading, ImageClassifier};
use crate::capture::FrameSource;
use crate::dispatch::{CommandSink, DetectedCommand};
use crate::mode::{InputMode, ModeSnapshot, ModeTrigger};

/// Timing for the gesture channel
#[derive(Debug, Clone)]
pub struct GestureSettings {
    pub period: Duration,
    /// Presence-only sampling while Idle; off when `None`
    pub idle_watch: Option<Duration>,
    pub request_timeout: Duration,
}

impl Default for GestureSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(2),
            idle_watch: None,
            request_timeout: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GestureRegime {
    /// Gesture mode: presence and gestures
    Active,
    /// Idle: presence only
    Watch,
}

/// Periodic camera classifier feeding the arbiter and dispatcher
pub struct GestureSampler {
    classifier: Arc<dyn ImageClassifier>,
    camera: Arc<dyn FrameSource>,
    sink: Arc<dyn CommandSink>,
    trigger_tx: mpsc::Sender<ModeTrigger>,
    mode_rx: watch::Receiver<ModeSnapshot>,
    settings: GestureSettings,
    /// Last hand presence reported to the arbiter
    hand_present: AtomicBool,
    busy: BusyFlag,
}

impl GestureSampler {
    pub fn new(
        classifier: Arc<dyn ImageClassifier>,
        camera: Arc<dyn FrameSource>,
        sink: Arc<dyn CommandSink>,
        trigger_tx: mpsc::Sender<ModeTrigger>,
        mode_rx: watch::Receiver<ModeSnapshot>,
        settings: GestureSettings,
    ) -> Self {
        Self {
            classifier,
            camera,
            sink,
            trigger_tx,
            mode_rx,
            settings,
            hand_present: AtomicBool::new(false),
            busy: BusyFlag::default(),
        }
    }

    /// Sample until the arbiter goes away
    pub async fn run(self) {
        let mode_rx = self.mode_rx.clone();
        drive(Arc::new(self), mode_rx).await;
    }

    async fn sample(&self) -> Result<GestureReading, SampleError> {
        let frame = self.camera.capture_frame().await?;
        Ok(self.classifier.classify(&frame).await?)
    }
}

#[async_trait]
impl SamplerChannel for GestureSampler {
    type Regime = GestureRegime;

    const NAME: &'static str = "gesture";

    fn regime(&self, mode: InputMode) -> Option<(GestureRegime, Duration)> {
        match mode {
            InputMode::GestureActive => Some((GestureRegime::Active, self.settings.period)),
            InputMode::Idle => self
                .settings
                .idle_watch
                .map(|period| (GestureRegime::Watch, period)),
            InputMode::VoiceActive => None,
        }
    }

    fn busy(&self) -> &BusyFlag {
        &self.busy
    }

    fn stopped(&self) {
        self.hand_present.store(false, Ordering::SeqCst);
    }

    async fn tick(self: Arc<Self>, regime: GestureRegime, snapshot: ModeSnapshot) {
        let reading = match bounded(self.settings.request_timeout, self.sample()).await {
            Ok(reading) => reading,
            Err(e) => {
                warn!(error = %e, "gesture tick failed, skipping");
                return;
            }
        };

        let current_epoch = self.mode_rx.borrow().epoch;
        if current_epoch != snapshot.epoch {
            debug!(?reading, "mode changed during classification, discarding");
            return;
        }

        let previous = self.hand_present.swap(reading.hand_present, Ordering::SeqCst);
        if previous != reading.hand_present {
            debug!(present = reading.hand_present, "hand presence changed");
            let trigger = ModeTrigger::HandPresence {
                present: reading.hand_present,
                epoch: snapshot.epoch,
            };
            if self.trigger_tx.send(trigger).await.is_err() {
                warn!("mode arbiter gone, dropping hand presence");
            }
        }

        if regime == GestureRegime::Active {
            if let Some(gesture) = reading.actionable() {
                debug!(%gesture, "gesture recognised");
                self.sink.submit(DetectedCommand::gesture(gesture, snapshot.epoch));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::ScriptedClassifier;
    use crate::backend::{BackendError, GestureLabel};
    use crate::capture::StaticSource;

    struct Harness {
        classifier: Arc<ScriptedClassifier>,
        mode_tx: watch::Sender<ModeSnapshot>,
        trigger_rx: mpsc::Receiver<ModeTrigger>,
        command_rx: mpsc::UnboundedReceiver<DetectedCommand>,
    }

    fn start(classifier: ScriptedClassifier, settings: GestureSettings, initial: ModeSnapshot) -> Harness {
        let classifier = Arc::new(classifier);
        let (mode_tx, mode_rx) = watch::channel(initial);
        let (trigger_tx, trigger_rx) = mpsc::channel(16);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let sampler = GestureSampler::new(
            classifier.clone(),
            Arc::new(StaticSource::new(b"frame".to_vec())),
            Arc::new(command_tx),
            trigger_tx,
            mode_rx,
            settings,
        );
        tokio::spawn(sampler.run());

        Harness {
            classifier,
            mode_tx,
            trigger_rx,
            command_rx,
        }
    }

    fn active(epoch: u64) -> ModeSnapshot {
        ModeSnapshot {
            mode: InputMode::GestureActive,
            epoch,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_gesture_and_presence() {
        let mut h = start(
            ScriptedClassifier::new(vec![Ok(GestureReading::new(true, GestureLabel::Call))]),
            GestureSettings::default(),
            active(1),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            h.trigger_rx.try_recv().unwrap(),
            ModeTrigger::HandPresence {
                present: true,
                epoch: 1
            }
        );
        assert_eq!(
            h.command_rx.try_recv().unwrap(),
            DetectedCommand::gesture(GestureLabel::Call, 1)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_reported_only_on_change() {
        let hand = Ok(GestureReading::new(true, GestureLabel::None));
        let mut h = start(
            ScriptedClassifier::new(vec![hand.clone(), hand, Ok(GestureReading::default())]),
            GestureSettings::default(),
            active(1),
        );

        tokio::time::sleep(Duration::from_secs(5)).await;

        let mut reports = Vec::new();
        while let Ok(trigger) = h.trigger_rx.try_recv() {
            reports.push(trigger);
        }
        assert_eq!(
            reports,
            vec![
                ModeTrigger::HandPresence { present: true, epoch: 1 },
                ModeTrigger::HandPresence { present: false, epoch: 1 },
            ]
        );
        assert!(h.command_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_failures_keep_sampling() {
        let mut h = start(
            ScriptedClassifier::failing(BackendError::Unavailable("offline".into())),
            GestureSettings::default(),
            active(1),
        );

        tokio::time::sleep(Duration::from_secs(11)).await;

        assert!(h.classifier.calls() >= 5, "calls = {}", h.classifier.calls());
        assert!(h.command_rx.try_recv().is_err());
        assert!(h.trigger_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_backend_ticks_are_skipped() {
        let h = start(
            ScriptedClassifier::new(Vec::new()).with_delay(Duration::from_secs(5)),
            GestureSettings::default(),
            active(1),
        );

        // ticks at 0, 2, 4 overlap the first 5 s request
        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(h.classifier.calls(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.classifier.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_mode_leaves_and_discards_in_flight() {
        let mut h = start(
            ScriptedClassifier::cycling(vec![Ok(GestureReading::new(true, GestureLabel::Save))])
                .with_delay(Duration::from_secs(1)),
            GestureSettings::default(),
            active(1),
        );

        tokio::time::sleep(Duration::from_millis(500)).await;
        h.mode_tx.send_replace(ModeSnapshot {
            mode: InputMode::VoiceActive,
            epoch: 2,
        });
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(h.classifier.calls(), 1);
        assert!(h.command_rx.try_recv().is_err());
        assert!(h.trigger_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_watch_reports_presence_only() {
        let settings = GestureSettings {
            idle_watch: Some(Duration::from_secs(5)),
            ..GestureSettings::default()
        };
        let mut h = start(
            ScriptedClassifier::new(vec![Ok(GestureReading::new(true, GestureLabel::Call))]),
            settings,
            ModeSnapshot::default(),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            h.trigger_rx.try_recv().unwrap(),
            ModeTrigger::HandPresence {
                present: true,
                epoch: 0
            }
        );
        assert!(h.command_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_sampling_while_idle_without_watch() {
        let h = start(
            ScriptedClassifier::new(Vec::new()),
            GestureSettings::default(),
            ModeSnapshot::default(),
        );
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.classifier.calls(), 0);
    }
}
