//! ============================================================================
//! Call Session - status machine around the voice SDK
//! ============================================================================
//! idle --start--> connecting --call-start--> listening
//! listening --speech-end--> processing --speech-start--> listening
//! any --call-end / stop()--> idle, any --error--> idle
//!
//! The start handshake runs on its own task. Its failure comes back through
//! the same event channel tagged with the start epoch, so a result that
//! lands after `stop()` is dropped instead of clobbering the new state.
//! ============================================================================

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::types::{CallStatus, OrderingError};
use crate::voice::{OutboundMessage, VoiceEvent, VoiceMessage, VoiceTransport};

/// Normalized event fanned out to session subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SessionEvent {
    CallStarted,
    CallEnded,
    SpeechStarted,
    SpeechEnded,
    Message(VoiceMessage),
    FunctionCall {
        name: String,
        params: Map<String, Value>,
    },
    Error {
        message: String,
    },
}

/// Owned adapter around one voice SDK client
pub struct CallSession {
    transport: Arc<dyn VoiceTransport>,
    /// Loopback into the transport's event channel for handshake results
    events: mpsc::UnboundedSender<VoiceEvent>,
    public_key: Option<String>,
    status: CallStatus,
    muted: bool,
    epoch: u64,
    subscribers: Vec<mpsc::UnboundedSender<SessionEvent>>,
}

impl CallSession {
    pub fn new(
        transport: Arc<dyn VoiceTransport>,
        events: mpsc::UnboundedSender<VoiceEvent>,
        public_key: Option<String>,
    ) -> Self {
        if public_key.is_none() {
            error!("Voice SDK public key not configured; calls are disabled");
        }
        Self {
            transport,
            events,
            public_key,
            status: CallStatus::Idle,
            muted: false,
            epoch: 0,
            subscribers: Vec::new(),
        }
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Register an observer. Events are best-effort; a dropped receiver is
    /// pruned on the next emit.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Refuse a start that can never succeed. Subscribers see the error.
    pub fn preflight(&mut self, assistant_id: &str) -> Result<(), OrderingError> {
        if self.public_key.is_none() {
            self.fail(OrderingError::MissingVoiceKey.to_string());
            return Err(OrderingError::MissingVoiceKey);
        }
        if assistant_id.trim().is_empty() {
            let err = OrderingError::MissingAssistant(assistant_id.to_string());
            self.fail(err.to_string());
            return Err(err);
        }
        Ok(())
    }

    /// Request a call with `assistant_id`. Must run inside a tokio runtime.
    pub fn start(&mut self, assistant_id: &str) -> Result<(), OrderingError> {
        self.preflight(assistant_id)?;
        if self.status.is_active() {
            warn!("Call already {:?}; ignoring start", self.status);
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| OrderingError::VoiceError(format!("No async runtime: {}", e)))?;

        self.epoch += 1;
        self.status = CallStatus::Connecting;
        info!("Starting call with assistant {} (epoch {})", assistant_id, self.epoch);

        let epoch = self.epoch;
        let transport = Arc::clone(&self.transport);
        let events = self.events.clone();
        let assistant_id = assistant_id.to_string();

        runtime.spawn(async move {
            if let Err(e) = transport.start(&assistant_id).await {
                let _ = events.send(VoiceEvent::HandshakeFailed {
                    epoch,
                    error: e.to_string(),
                });
            }
        });

        Ok(())
    }

    /// End the call. Safe to call when already idle.
    pub fn stop(&mut self) {
        if self.status.is_active() {
            info!("Stopping call");
            self.transport.stop();
        } else {
            debug!("Stop requested while idle");
        }
        self.epoch += 1;
        self.status = CallStatus::Idle;
        self.muted = false;
    }

    /// Flip mute on the live call; returns the resulting mute state
    pub fn toggle_mute(&mut self) -> bool {
        if !self.status.is_active() {
            return self.muted;
        }
        self.muted = !self.muted;
        self.transport.set_muted(self.muted);
        self.muted
    }

    /// Inject a user message into the live call; false when idle
    pub fn send_message(&mut self, text: &str) -> bool {
        if !self.status.is_active() {
            debug!("Dropping message while idle");
            return false;
        }
        self.transport.send(OutboundMessage::user(text));
        true
    }

    /// Apply an SDK event and return the normalized events it produced.
    /// The same events go to every subscriber.
    pub fn handle_event(&mut self, event: VoiceEvent) -> Vec<SessionEvent> {
        let mut out = Vec::new();

        match event {
            VoiceEvent::CallStart => {
                if self.status == CallStatus::Connecting {
                    self.status = CallStatus::Listening;
                    out.push(SessionEvent::CallStarted);
                } else if self.status == CallStatus::Idle {
                    // Connected after the user hung up; end it on the SDK side too
                    info!("Call started after stop; hanging up");
                    self.transport.stop();
                } else {
                    debug!("Ignoring call-start while {:?}", self.status);
                }
            }
            VoiceEvent::CallEnd => {
                self.status = CallStatus::Idle;
                self.muted = false;
                out.push(SessionEvent::CallEnded);
            }
            VoiceEvent::SpeechStart => {
                if self.status.is_active() {
                    self.status = CallStatus::Listening;
                    out.push(SessionEvent::SpeechStarted);
                }
            }
            VoiceEvent::SpeechEnd => {
                if self.status.is_active() {
                    self.status = CallStatus::Processing;
                    out.push(SessionEvent::SpeechEnded);
                }
            }
            VoiceEvent::Message(message) => {
                if !self.status.is_active() {
                    debug!("Dropping '{}' message while idle", message.kind);
                } else {
                    let calls = message.function_calls();
                    out.push(SessionEvent::Message(message));
                    out.extend(
                        calls
                            .into_iter()
                            .map(|(name, params)| SessionEvent::FunctionCall { name, params }),
                    );
                }
            }
            VoiceEvent::Error { message } => {
                error!("Voice SDK error: {}", message);
                self.status = CallStatus::Idle;
                self.muted = false;
                out.push(SessionEvent::Error { message });
            }
            VoiceEvent::HandshakeFailed { epoch, error } => {
                if epoch == self.epoch && self.status == CallStatus::Connecting {
                    error!("Failed to start call: {}", error);
                    self.status = CallStatus::Idle;
                    out.push(SessionEvent::Error { message: error });
                } else {
                    debug!("Ignoring stale handshake failure (epoch {}): {}", epoch, error);
                }
            }
        }

        for event in &out {
            self.emit(event.clone());
        }
        out
    }

    /// Stop any call and drop all observers
    pub fn shutdown(&mut self) {
        self.stop();
        self.subscribers.clear();
    }

    fn fail(&mut self, message: String) {
        error!("{}", message);
        self.status = CallStatus::Idle;
        self.emit(SessionEvent::Error { message });
    }

    fn emit(&mut self, event: SessionEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        if self.status.is_active() {
            self.transport.stop();
        }
    }
}
