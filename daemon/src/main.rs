//! call-genie-daemon: hands-free command dispatcher for the calling app
//!
//! This daemon runs alongside the UI and provides:
//! - Gesture sampling from camera frames while gesture mode is on
//! - Background trigger-phrase listening and single-shot voice commands
//! - A mode arbiter keeping exactly one input mode current
//! - A command dispatcher turning detections into call-control actions
//! - IPC server for the manual buttons, dial pad and contact/call stores
//!
//! Capture hardware and the recognition models stay outside: frames and
//! clips arrive through spool directories, recognition goes to HTTP
//! services (or scripted stand-ins with `CALL_GENIE_SIMULATE=1`).

mod backend;
mod call;
mod capture;
mod config;
mod dispatch;
mod events;
mod ipc;
mod lifecycle;
mod mode;
mod sampler;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::backend::fake::{self, KeywordInterpreter};
use crate::backend::{
    CommandInterpreter, ImageClassifier, LlmClient, LlmCommandInterpreter, LlmGestureClassifier,
    SpeechPipeline, SttClient,
};
use crate::call::LocalCallControl;
use crate::capture::{ClipSource, FrameSource, SpoolDir, StaticSource};
use crate::config::Config;
use crate::dispatch::CommandDispatcher;
use crate::events::DaemonEvent;
use crate::ipc::{DaemonControl, Server};
use crate::lifecycle::ShutdownSignal;
use crate::mode::ModeArbiter;
use crate::sampler::{GestureSampler, VoiceSampler};

/// Recognition services and capture sources the samplers run on
struct Backends {
    classifier: Arc<dyn ImageClassifier>,
    speech: Arc<dyn SpeechPipeline>,
    interpreter: Arc<dyn CommandInterpreter>,
    camera: Arc<dyn FrameSource>,
    microphone: Arc<dyn ClipSource>,
}

impl Backends {
    fn from_config(config: &Config) -> Result<Self> {
        if config.simulate {
            warn!("simulate mode: scripted recognition, no capture hardware");
            let media = Arc::new(StaticSource::new(b"simulated".to_vec()));
            return Ok(Self {
                classifier: Arc::new(fake::simulated_classifier()),
                speech: Arc::new(fake::simulated_speech()),
                interpreter: Arc::new(KeywordInterpreter),
                camera: media.clone(),
                microphone: media,
            });
        }

        let timeout = config.backend.timeout();
        let llm = Arc::new(
            LlmClient::new(&config.backend.llm_url, timeout)
                .context("failed to build LLM client")?,
        );
        let stt = SttClient::new(&config.backend.stt_url, timeout)
            .context("failed to build speech-to-text client")?
            .with_language(&config.backend.language);

        let frames = SpoolDir::new(&config.capture.frames_dir);
        let clips = SpoolDir::new(&config.capture.clips_dir);
        info!(
            llm = %config.backend.llm_url,
            stt = %config.backend.stt_url,
            frames = ?frames.path(),
            clips = ?clips.path(),
            "recognition backends configured"
        );

        Ok(Self {
            classifier: Arc::new(LlmGestureClassifier::new(llm.clone())),
            speech: Arc::new(stt),
            interpreter: Arc::new(LlmCommandInterpreter::new(llm)),
            camera: Arc::new(frames),
            microphone: Arc::new(clips),
        })
    }
}

/// Contacts the simulated "Call John" style commands resolve against
const DEMO_CONTACTS: &[(&str, &str)] = &[
    ("John Doe", "+1 (555) 123-4567"),
    ("Jane Smith", "+1 (555) 987-6543"),
    ("Robert Johnson", "+1 (555) 456-7890"),
    ("Emily Davis", "+1 (555) 234-5678"),
];

fn open_call_stores(config: &Config) -> Result<LocalCallControl> {
    if config.simulate {
        // scripted commands never touch the saved stores
        let calls = LocalCallControl::in_memory();
        for (name, number) in DEMO_CONTACTS {
            calls.add_contact(name, number)?;
        }
        return Ok(calls);
    }

    LocalCallControl::open(&config.data_dir).context("failed to open call stores")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "call-genie-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, simulate = config.simulate, "configuration loaded");

    // Create shutdown signal handler
    let mut shutdown = ShutdownSignal::new().context("failed to register signal handlers")?;

    // Create channels for inter-component communication
    // Samplers / IPC -> mode arbiter
    let (trigger_tx, trigger_rx) = mpsc::channel(32);
    // Arbiter / dispatcher -> IPC subscribers
    let (event_tx, _event_rx) = broadcast::channel::<DaemonEvent>(64);

    let mut arbiter = ModeArbiter::new(event_tx.clone());

    let calls = Arc::new(open_call_stores(&config)?);
    let dispatcher = Arc::new(CommandDispatcher::new(
        calls.clone(),
        arbiter.subscribe(),
        event_tx.clone(),
    ));

    let backends = Backends::from_config(&config)?;

    let gesture_sampler = GestureSampler::new(
        backends.classifier,
        backends.camera,
        dispatcher.clone(),
        trigger_tx.clone(),
        arbiter.subscribe(),
        config.gesture_settings(),
    );
    let voice_sampler = VoiceSampler::new(
        backends.speech,
        backends.interpreter,
        backends.microphone,
        dispatcher,
        trigger_tx.clone(),
        arbiter.subscribe(),
        config.voice_settings(),
    );
    let listening = voice_sampler.listening_switch();
    tokio::spawn(gesture_sampler.run());
    tokio::spawn(voice_sampler.run());

    // Create IPC server
    let server = Server::new(
        &config.socket_path,
        DaemonControl {
            trigger_tx,
            mode_rx: arbiter.subscribe(),
            event_tx: event_tx.clone(),
            calls,
            listening,
            simulate: config.simulate,
        },
    )?;

    // Log every daemon event
    let mut log_rx = event_tx.subscribe();
    let event_log = async {
        loop {
            match log_rx.recv().await {
                Ok(event) => info!(%event, "daemon event"),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "event log receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the mode arbiter (processes detection and manual triggers)
        _ = arbiter.run(trigger_rx) => {
            info!("mode arbiter exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        _ = event_log => {
            debug!("event log exited");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    server.shutdown().await;

    info!("call-genie-daemon stopped");

    Ok(())
}
