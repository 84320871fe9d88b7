//! ============================================================================
//! Order Desk - one voice-ordering session end to end
//! ============================================================================
//! Owns the call session and the dispatcher. SDK events go through the
//! session's status machine first; the normalized events then update the
//! transcript, the log and (through the dispatcher) the cart.
//!
//! Single owner, driven from one task: all mutation happens through
//! `&mut self`, so no locking is needed around the stores.
//! ============================================================================

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::CartCommands;
use crate::cart::{Cart, CartChange};
use crate::config::DeskConfig;
use crate::dispatcher::{Dispatcher, OrderSnapshot, OrderState};
use crate::session::{CallSession, SessionEvent};
use crate::types::{Agent, CallStatus, CartLineItem, LogKind, OrderingError, Role};
use crate::voice::{VoiceEvent, VoiceTransport};

/// Transcript excerpt length in log lines
const LOG_EXCERPT_CHARS: usize = 50;

/// Where the cart of each call lives
#[derive(Clone)]
pub enum CartSource {
    Local,
    Remote {
        session_id: String,
        commands: Arc<dyn CartCommands>,
    },
}

impl CartSource {
    fn fresh_cart(&self) -> Cart {
        match self {
            CartSource::Local => Cart::local(),
            CartSource::Remote { session_id, commands } => {
                Cart::remote(session_id.clone(), Arc::clone(commands))
            }
        }
    }
}

pub struct OrderDesk {
    config: DeskConfig,
    session: CallSession,
    dispatcher: Dispatcher,
    cart_source: CartSource,
    /// A call was started and its order has not been archived yet
    call_open: bool,
    last_order: Option<OrderSnapshot>,
}

impl OrderDesk {
    /// `events` must be the sender the transport emits on
    pub fn new(
        config: DeskConfig,
        transport: Arc<dyn VoiceTransport>,
        events: mpsc::UnboundedSender<VoiceEvent>,
    ) -> Self {
        let session = CallSession::new(transport, events, config.voice_public_key.clone());
        let mut state = OrderState::with_caps(config.log_cap, config.transcript_cap);
        state.logs.append(LogKind::System, "Voice system initialized");

        Self {
            config,
            session,
            dispatcher: Dispatcher::new(state),
            cart_source: CartSource::Local,
            call_open: false,
            last_order: None,
        }
    }

    /// Mirror the cart of `session_id` and send mutations through `commands`
    pub fn with_remote_cart(mut self, session_id: impl Into<String>, commands: Arc<dyn CartCommands>) -> Self {
        let session_id = session_id.into();
        info!("Using remote cart for session {}", session_id);
        self.cart_source = CartSource::Remote { session_id, commands };
        self.dispatcher.state_mut().cart = self.cart_source.fresh_cart();
        self.dispatcher
            .state_mut()
            .logs
            .append(LogKind::ExternalApi, "Backend connection established");
        self
    }

    pub fn config(&self) -> &DeskConfig {
        &self.config
    }

    pub fn status(&self) -> CallStatus {
        self.session.status()
    }

    pub fn is_muted(&self) -> bool {
        self.session.is_muted()
    }

    pub fn state(&self) -> &OrderState {
        self.dispatcher.state()
    }

    pub fn snapshot(&self) -> OrderSnapshot {
        self.dispatcher.snapshot()
    }

    /// Observe normalized session events (for a UI or the CLI)
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
        self.session.subscribe()
    }

    /// Agent for the next call; a live call keeps its assistant
    pub fn select_agent(&mut self, agent: Agent) {
        self.dispatcher.state_mut().agent = agent;
    }

    fn log(&mut self, kind: LogKind, message: impl Into<String>) {
        self.dispatcher.state_mut().logs.append(kind, message);
    }

    /// Begin a call with the currently selected agent. The cart and
    /// transcript start empty; the log carries over.
    pub async fn start_call(&mut self) -> Result<(), OrderingError> {
        if self.session.status().is_active() {
            warn!("Call already active");
            return Ok(());
        }

        let agent = self.dispatcher.state().agent;
        let assistant_id = self.config.assistant_for(agent).to_string();
        // Nothing is reset or sent to the backend for a call that cannot start
        if let Err(e) = self.session.preflight(&assistant_id) {
            self.log(LogKind::System, format!("Error: {}", e));
            return Err(e);
        }

        let fresh_cart = self.cart_source.fresh_cart();
        let state = self.dispatcher.state_mut();
        state.transcript.clear();
        state.cart = fresh_cart;
        state.contact_capture = false;

        if let CartSource::Remote { session_id, commands } = self.cart_source.clone() {
            match commands.start_session(&session_id).await {
                Ok(_) => self.log(LogKind::ExternalApi, format!("Session {} started", session_id)),
                Err(e) => self.log(LogKind::ExternalApi, format!("start-session failed: {}", e)),
            }
        }

        self.log(LogKind::System, "Initiating connection...");

        if let Err(e) = self.session.start(&assistant_id) {
            self.log(LogKind::System, format!("Error: {}", e));
            return Err(e);
        }
        self.call_open = true;
        Ok(())
    }

    /// User hang-up. Clears the cart, transcript and contact form.
    pub fn stop_call(&mut self) {
        self.session.stop();
        self.clear_call_state();
    }

    pub fn toggle_mute(&mut self) -> bool {
        self.session.toggle_mute()
    }

    pub fn send_message(&mut self, text: &str) -> bool {
        self.session.send_message(text)
    }

    /// Contact-capture form submission; empty input is rejected
    pub fn submit_contact(&mut self, email: &str) -> bool {
        let email = email.trim();
        if email.is_empty() {
            return false;
        }
        self.dispatcher.state_mut().contact.email = Some(email.to_string());
        self.log(LogKind::System, format!("Receipt will be sent to {}", email));
        true
    }

    /// Order as it stood when the previous call ended
    pub fn last_order(&self) -> Option<&OrderSnapshot> {
        self.last_order.as_ref()
    }

    fn clear_call_state(&mut self) {
        if std::mem::take(&mut self.call_open) {
            self.last_order = Some(self.dispatcher.snapshot());
        }
        let state = self.dispatcher.state_mut();
        state.cart.clear();
        state.transcript.clear();
        state.contact_capture = false;
    }

    /// Apply one SDK event
    pub async fn handle_voice_event(&mut self, event: VoiceEvent) {
        for event in self.session.handle_event(event) {
            self.on_session_event(event).await;
        }
    }

    async fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::CallStarted => {
                let agent = self.dispatcher.state().agent;
                self.dispatcher.state_mut().transcript.clear();
                self.log(LogKind::System, format!("Connected to {}", agent.display_name()));
            }
            SessionEvent::CallEnded => {
                self.log(LogKind::System, "Call ended");
                self.clear_call_state();
            }
            SessionEvent::SpeechStarted => {}
            SessionEvent::SpeechEnded => {
                self.log(LogKind::System, "Processing speech...");
            }
            SessionEvent::Message(message) => {
                if let Some((role, text)) = message.final_transcript() {
                    let text = text.to_string();
                    if self.dispatcher.state_mut().transcript.push(role, text.clone()) {
                        let speaker = match role {
                            Role::User => "User",
                            Role::Assistant => self.dispatcher.state().agent.display_name(),
                        };
                        self.log(LogKind::ExternalApi, format!("{}: {}", speaker, excerpt(&text)));
                    }
                }
            }
            SessionEvent::FunctionCall { name, params } => {
                self.dispatcher.dispatch(&name, &params).await;
            }
            SessionEvent::Error { message } => {
                self.log(LogKind::System, format!("Error: {}", message));
            }
        }
    }

    pub fn apply_cart_change(&mut self, change: CartChange) {
        if !self.dispatcher.apply_cart_change(change) {
            debug!("Dropped cart change: cart is local");
        }
    }

    pub fn load_cart_snapshot(&mut self, items: Vec<CartLineItem>) {
        if !self.dispatcher.load_cart_snapshot(items) {
            debug!("Dropped cart snapshot: cart is local");
        }
    }

    /// Drive the desk until the call is idle again or the SDK channel closes.
    /// Cart changes are applied as they arrive.
    pub async fn run(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<VoiceEvent>,
        mut changes: Option<&mut mpsc::Receiver<CartChange>>,
    ) {
        while self.status().is_active() {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_voice_event(event).await,
                    None => {
                        warn!("Voice event channel closed");
                        break;
                    }
                },
                Some(change) = next_change(&mut changes) => self.apply_cart_change(change),
            }
        }
    }

    /// Explicit teardown: stop any call and drop observers
    pub fn shutdown(&mut self) {
        self.session.shutdown();
        self.clear_call_state();
    }
}

async fn next_change(changes: &mut Option<&mut mpsc::Receiver<CartChange>>) -> Option<CartChange> {
    match changes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn excerpt(text: &str) -> String {
    if text.chars().count() > LOG_EXCERPT_CHARS {
        let head: String = text.chars().take(LOG_EXCERPT_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}
