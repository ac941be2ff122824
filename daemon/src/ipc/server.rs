//! Unix domain socket server for IPC
//!
//! Provides request-response communication for the manual controls and the
//! call stores, and pushes daemon events to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::call::{CallContext, CallControl, LocalCallControl};
use crate::events::DaemonEvent;
use crate::mode::{ModeSnapshot, ModeTrigger};

use super::protocol::{DaemonStatus, Notification, Request, Response};

const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// How long a toggle waits for the arbiter to publish the new mode
const TOGGLE_WAIT: Duration = Duration::from_secs(1);

/// Handles into the running daemon that the server acts on
pub struct DaemonControl {
    pub trigger_tx: mpsc::Sender<ModeTrigger>,
    pub mode_rx: watch::Receiver<ModeSnapshot>,
    pub event_tx: broadcast::Sender<DaemonEvent>,
    pub calls: Arc<LocalCallControl>,
    /// Background trigger-listening switch of the voice sampler
    pub listening: Arc<watch::Sender<bool>>,
    pub simulate: bool,
}

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    state: Arc<ServerState>,
    shutdown_tx: broadcast::Sender<()>,
}

/// Shared server state
struct ServerState {
    control: DaemonControl,
    start_time: Instant,
}

enum ClientStep {
    Frame(Option<Vec<u8>>),
    Event(Result<DaemonEvent, RecvError>),
}

impl Server {
    /// Create a new IPC server
    pub fn new(socket_path: &Path, control: DaemonControl) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(ServerState {
            control,
            start_time: Instant::now(),
        });

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            state,
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let state = Arc::clone(&self.state);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, state) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, state: Arc<ServerState>) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let (frame_tx, mut frame_rx) = mpsc::channel(8);
        let reader_task = tokio::spawn(Self::read_frames(reader, frame_tx));
        let mut events: Option<broadcast::Receiver<DaemonEvent>> = None;

        let result = loop {
            let step = tokio::select! {
                frame = frame_rx.recv() => ClientStep::Frame(frame),
                event = next_event(&mut events) => ClientStep::Event(event),
            };

            match step {
                ClientStep::Frame(None) => {
                    debug!("client disconnected");
                    break Ok(());
                }
                ClientStep::Frame(Some(frame)) => {
                    let response = match serde_json::from_slice::<Request>(&frame) {
                        Ok(request) => {
                            debug!(?request, "received request");
                            if request == Request::Subscribe && events.is_none() {
                                events = Some(state.control.event_tx.subscribe());
                                debug!("client subscribed to notifications");
                            }
                            Self::process_request(request, &state).await
                        }
                        Err(e) => {
                            warn!(error = %e, "malformed request");
                            Response::error("invalid_request", e.to_string())
                        }
                    };
                    if let Err(e) = Self::send_message(&mut writer, &response).await {
                        break Err(e);
                    }
                }
                ClientStep::Event(Ok(event)) => {
                    let note = Notification::Event { event };
                    if let Err(e) = Self::send_message(&mut writer, &note).await {
                        break Err(e);
                    }
                }
                ClientStep::Event(Err(RecvError::Lagged(n))) => {
                    warn!(skipped = n, "subscriber lagged behind daemon events");
                }
                ClientStep::Event(Err(RecvError::Closed)) => {
                    events = None;
                }
            }
        };

        reader_task.abort();
        result
    }

    /// Read length-prefixed frames until EOF or an oversized message
    async fn read_frames(mut reader: OwnedReadHalf, frame_tx: mpsc::Sender<Vec<u8>>) -> Result<()> {
        let mut len_buf = [0u8; 4];

        loop {
            // Read message length (4-byte little-endian)
            match reader.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_MESSAGE_LEN {
                warn!(len, "message too large, disconnecting");
                return Ok(());
            }

            let mut msg_buf = vec![0u8; len];
            reader.read_exact(&mut msg_buf).await?;

            if frame_tx.send(msg_buf).await.is_err() {
                return Ok(());
            }
        }
    }

    /// Send a length-prefixed JSON message
    async fn send_message<T: serde::Serialize>(writer: &mut OwnedWriteHalf, msg: &T) -> Result<()> {
        let msg_bytes = serde_json::to_vec(msg)?;
        let msg_len = (msg_bytes.len() as u32).to_le_bytes();

        writer.write_all(&msg_len).await?;
        writer.write_all(&msg_bytes).await?;

        Ok(())
    }

    /// Process a request and return a response
    async fn process_request(request: Request, state: &ServerState) -> Response {
        let calls = &state.control.calls;

        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => Response::Status(state.status()),

            Request::Subscribe => Response::Subscribed,

            Request::ToggleGesture => state.toggle(ModeTrigger::ToggleGesture).await,

            Request::ToggleVoice => state.toggle(ModeTrigger::ToggleVoice).await,

            Request::ToggleAlwaysListening => state.toggle_listening(),

            Request::PressKey { key } => match calls.press_key(key) {
                Ok(_) => state.dial_state(),
                Err(e) => e.into(),
            },

            Request::DeleteDigit => {
                calls.delete_last_digit();
                state.dial_state()
            }

            Request::ClearNumber => {
                calls.clear_number();
                state.dial_state()
            }

            Request::Dial { number } => {
                let number = number.unwrap_or_else(|| calls.staged_number());
                info!(%number, "dial requested via IPC");
                match calls.dial(&number) {
                    Ok(_) => state.dial_state(),
                    Err(e) => e.into(),
                }
            }

            Request::Hangup => match calls.hangup() {
                Ok(_) => state.dial_state(),
                Err(e) => e.into(),
            },

            Request::ListContacts => Response::Contacts {
                contacts: calls.contacts(),
            },

            Request::AddContact { name, phone_number } => {
                match calls.add_contact(&name, &phone_number) {
                    Ok(_) => Response::Contacts {
                        contacts: calls.contacts(),
                    },
                    Err(e) => e.into(),
                }
            }

            Request::UpdateContact { contact } => match calls.update_contact(contact) {
                Ok(()) => Response::Contacts {
                    contacts: calls.contacts(),
                },
                Err(e) => e.into(),
            },

            Request::DeleteContact { id } => match calls.delete_contact(&id) {
                Ok(()) => Response::Contacts {
                    contacts: calls.contacts(),
                },
                Err(e) => e.into(),
            },

            Request::ToggleFavorite { id } => match calls.toggle_favorite(&id) {
                Ok(_) => Response::Contacts {
                    contacts: calls.contacts(),
                },
                Err(e) => e.into(),
            },

            Request::ListCallLogs => Response::CallLogs {
                call_logs: calls.call_logs(),
            },

            Request::DeleteCallLog { id } => match calls.delete_call_log(&id) {
                Ok(()) => Response::CallLogs {
                    call_logs: calls.call_logs(),
                },
                Err(e) => e.into(),
            },

            Request::ClearCallLogs => match calls.clear_call_logs() {
                Ok(()) => Response::Ok,
                Err(e) => e.into(),
            },

            Request::ListBlocked => Response::Blocked {
                numbers: calls.blocked(),
            },
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

impl ServerState {
    fn status(&self) -> DaemonStatus {
        let snapshot = *self.control.mode_rx.borrow();
        DaemonStatus {
            mode: snapshot.mode,
            epoch: snapshot.epoch,
            simulate: self.control.simulate,
            always_listening: *self.control.listening.borrow(),
            staged_number: self.control.calls.staged_number(),
            in_call: self.control.calls.active_call().is_some(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            ..DaemonStatus::default()
        }
    }

    fn dial_state(&self) -> Response {
        Response::DialState {
            staged: self.control.calls.staged_number(),
            active_call: self.control.calls.active_call(),
        }
    }

    fn toggle_listening(&self) -> Response {
        let mut enabled = false;
        self.control.listening.send_modify(|on| {
            *on = !*on;
            enabled = *on;
        });

        info!(enabled, "always-listening toggled via IPC");
        let _ = self
            .control
            .event_tx
            .send(DaemonEvent::AlwaysListeningChanged { enabled });
        Response::Listening {
            always_listening: enabled,
        }
    }

    /// Forward a manual toggle and report the mode it produced
    async fn toggle(&self, trigger: ModeTrigger) -> Response {
        let mut mode_rx = self.control.mode_rx.clone();
        let before = mode_rx.borrow_and_update().epoch;

        info!(?trigger, "manual toggle via IPC");
        if self.control.trigger_tx.send(trigger).await.is_err() {
            return Response::error("arbiter_unavailable", "mode arbiter is not running");
        }

        let published = tokio::time::timeout(TOGGLE_WAIT, async {
            mode_rx
                .wait_for(|snapshot| snapshot.epoch != before)
                .await
                .map(|snapshot| snapshot.mode)
        })
        .await;

        match published {
            Ok(Ok(mode)) => Response::Mode { mode },
            _ => {
                warn!("arbiter did not publish a new mode in time");
                Response::Mode {
                    mode: mode_rx.borrow().mode,
                }
            }
        }
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<DaemonEvent>>,
) -> Result<DaemonEvent, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
