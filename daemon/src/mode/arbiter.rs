//! Mode arbiter state machine
//!
//! Handles transitions between Idle, GestureActive and VoiceActive driven
//! by detections and manual toggles. Every transition bumps an epoch that
//! samplers and the dispatcher use to reject stale results.

use std::time::Instant;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info};

use crate::events::DaemonEvent;

/// The three input modes; exactly one is current
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// No channel active, background trigger listening only
    #[default]
    Idle,
    /// Camera gestures are sampled and dispatched
    GestureActive,
    /// One voice command is being captured
    VoiceActive,
}

impl std::fmt::Display for InputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputMode::Idle => write!(f, "Idle"),
            InputMode::GestureActive => write!(f, "GestureActive"),
            InputMode::VoiceActive => write!(f, "VoiceActive"),
        }
    }
}

/// Current mode plus the transition counter it was entered at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModeSnapshot {
    pub mode: InputMode,
    pub epoch: u64,
}

impl ModeSnapshot {
    /// Whether a result captured under `epoch` for `mode` still applies
    pub fn is_current(&self, mode: InputMode, epoch: u64) -> bool {
        self.mode == mode && self.epoch == epoch
    }
}

/// Inputs to the arbiter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeTrigger {
    /// Gesture sampler saw hand presence change
    HandPresence { present: bool, epoch: u64 },
    /// Background listener heard a trigger phrase
    VoiceTriggered { transcript: String, epoch: u64 },
    /// Manual gesture button
    ToggleGesture,
    /// Manual voice button
    ToggleVoice,
    /// Voice sampler finished its single-shot capture
    ReleaseVoice { epoch: u64 },
}

impl ModeTrigger {
    /// Epoch this trigger must still match to apply
    ///
    /// A trigger phrase applies in any mode other than VoiceActive, so it
    /// is checked against the mode instead.
    fn epoch(&self) -> Option<u64> {
        match self {
            ModeTrigger::HandPresence { epoch, .. } | ModeTrigger::ReleaseVoice { epoch } => {
                Some(*epoch)
            }
            ModeTrigger::VoiceTriggered { .. }
            | ModeTrigger::ToggleGesture
            | ModeTrigger::ToggleVoice => None,
        }
    }
}

/// Owns the input mode and enforces gesture/voice mutual exclusion
pub struct ModeArbiter {
    /// Published current mode
    mode_tx: watch::Sender<ModeSnapshot>,
    /// Time when current non-Idle mode was entered
    entered_at: Option<Instant>,
    /// Channel for emitting transition events
    event_tx: broadcast::Sender<DaemonEvent>,
}

impl ModeArbiter {
    /// Create an arbiter starting in Idle
    pub fn new(event_tx: broadcast::Sender<DaemonEvent>) -> Self {
        let (mode_tx, _) = watch::channel(ModeSnapshot::default());
        Self {
            mode_tx,
            entered_at: None,
            event_tx,
        }
    }

    /// Get the current snapshot
    pub fn snapshot(&self) -> ModeSnapshot {
        *self.mode_tx.borrow()
    }

    /// Receiver that observes every transition
    pub fn subscribe(&self) -> watch::Receiver<ModeSnapshot> {
        self.mode_tx.subscribe()
    }

    /// Run the arbiter, processing triggers until every sender is gone
    pub async fn run(&mut self, mut trigger_rx: mpsc::Receiver<ModeTrigger>) {
        info!("mode arbiter started in Idle");

        while let Some(trigger) = trigger_rx.recv().await {
            self.apply(trigger);
        }

        info!("mode arbiter stopped");
    }

    /// Apply one trigger synchronously and return the resulting snapshot
    pub fn apply(&mut self, trigger: ModeTrigger) -> ModeSnapshot {
        let current = self.snapshot();

        if let ModeTrigger::VoiceTriggered { epoch, .. } = &trigger {
            if current.mode == InputMode::VoiceActive {
                debug!(?trigger, "already in voice mode, ignoring trigger phrase");
                return current;
            }
            if *epoch != current.epoch {
                debug!(heard_at = *epoch, current = current.epoch, "trigger phrase outlived a transition");
            }
        }

        if let Some(epoch) = trigger.epoch() {
            if epoch != current.epoch {
                debug!(?trigger, current = current.epoch, "dropping stale trigger");
                return current;
            }
        }

        if let ModeTrigger::HandPresence { present, .. } = trigger {
            let _ = self.event_tx.send(DaemonEvent::HandPresenceChanged { present });
        }
        if let ModeTrigger::VoiceTriggered { ref transcript, .. } = trigger {
            let _ = self.event_tx.send(DaemonEvent::TriggerHeard {
                transcript: transcript.clone(),
            });
        }

        let next = Self::compute_next_mode(current.mode, &trigger);
        if next != current.mode {
            self.transition_to(next);
        }

        self.snapshot()
    }

    /// Compute the next mode from the current mode and a trigger
    fn compute_next_mode(mode: InputMode, trigger: &ModeTrigger) -> InputMode {
        match trigger {
            // Losing the hand keeps gesture mode on to avoid flicker
            ModeTrigger::HandPresence { present: true, .. } if mode == InputMode::Idle => {
                InputMode::GestureActive
            }
            ModeTrigger::HandPresence { .. } => mode,
            ModeTrigger::VoiceTriggered { .. } => InputMode::VoiceActive,
            ModeTrigger::ToggleGesture => match mode {
                InputMode::GestureActive => InputMode::Idle,
                _ => InputMode::GestureActive,
            },
            ModeTrigger::ToggleVoice => match mode {
                InputMode::VoiceActive => InputMode::Idle,
                _ => InputMode::VoiceActive,
            },
            ModeTrigger::ReleaseVoice { .. } => match mode {
                InputMode::VoiceActive => InputMode::Idle,
                other => other,
            },
        }
    }

    /// Perform a transition: exit the old mode, publish, enter the new one
    fn transition_to(&mut self, new_mode: InputMode) {
        let old = self.snapshot();
        let duration_ms = self
            .entered_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        info!(
            from = %old.mode,
            to = %new_mode,
            epoch = old.epoch + 1,
            duration_ms = duration_ms,
            "mode transition"
        );

        // The other channel is switched off before the new one is published
        self.emit_exit_event(old.mode, duration_ms);

        self.mode_tx.send_replace(ModeSnapshot {
            mode: new_mode,
            epoch: old.epoch + 1,
        });
        self.entered_at = if new_mode != InputMode::Idle {
            Some(Instant::now())
        } else {
            None
        };

        self.emit_entry_event(new_mode);
    }

    /// Emit an exit event for the given mode
    fn emit_exit_event(&self, mode: InputMode, duration_ms: u64) {
        let event = match mode {
            InputMode::Idle => return,
            InputMode::GestureActive => DaemonEvent::GestureModeExited { duration_ms },
            InputMode::VoiceActive => DaemonEvent::VoiceModeExited { duration_ms },
        };

        debug!(?event, "emitting exit event");
        let _ = self.event_tx.send(event);
    }

    /// Emit an entry event for the given mode
    fn emit_entry_event(&self, mode: InputMode) {
        let event = match mode {
            InputMode::Idle => return,
            InputMode::GestureActive => DaemonEvent::GestureModeEntered,
            InputMode::VoiceActive => DaemonEvent::VoiceModeEntered,
        };

        debug!(?event, "emitting entry event");
        let _ = self.event_tx.send(event);
    }
}
