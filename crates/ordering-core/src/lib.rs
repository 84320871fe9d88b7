//! ============================================================================
//! ORDERING-CORE: Zayup voice-ordering desk
//! ============================================================================
//! Backend logic for the Zayup ordering assistant:
//! - Call lifecycle over a pluggable voice transport
//! - Remote function calls mapped onto a local or backend-owned cart
//! - Bounded activity log and transcript stores
//! - Cart proxy client and realtime cart feed for the hosted backend
//! ============================================================================

pub mod actions;
pub mod backend;
pub mod cart;
pub mod config;
pub mod desk;
pub mod dispatcher;
pub mod session;
pub mod store;
pub mod types;
pub mod voice;

// Re-export main types for convenience
pub use types::*;
pub use actions::CartAction;
pub use backend::{BackendConfig, CartCommands, CartFeed, CartProxy, ProxyAction};
pub use cart::{Cart, CartChange};
pub use config::DeskConfig;
pub use desk::OrderDesk;
pub use dispatcher::{Dispatcher, OrderSnapshot, OrderState};
pub use session::{CallSession, SessionEvent};
pub use store::{LogStore, TranscriptStore};
pub use voice::{ScriptedTransport, VoiceEvent, VoiceTransport};
