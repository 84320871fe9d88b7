//! ============================================================================
//! Core Types for the Zayup Ordering Session
//! ============================================================================
//! Defines call status, log entries, transcript turns, cart line items and
//! agents. These types are serialized to JSON for display by the front-end.
//! ============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Call status mirrored from the voice SDK
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    #[default]
    Idle,
    Connecting,
    Listening,
    Processing,
}

impl CallStatus {
    /// Anything other than idle counts as an active call for the UI
    pub fn is_active(&self) -> bool {
        !matches!(self, CallStatus::Idle)
    }
}

/// Source of a log entry, shown as a tag in the admin log panel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogKind {
    /// Remote function invoked by the assistant
    #[serde(rename = "MCP")]
    RemoteFunction,
    /// External API traffic (proxy, transcript echo)
    #[serde(rename = "API")]
    ExternalApi,
    #[serde(rename = "SYSTEM")]
    System,
}

impl LogKind {
    pub fn tag(&self) -> &'static str {
        match self {
            LogKind::RemoteFunction => "MCP",
            LogKind::ExternalApi => "API",
            LogKind::System => "SYSTEM",
        }
    }
}

impl std::fmt::Display for LogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// A single line in the admin log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub message: String,
}

impl LogEntry {
    pub fn new(kind: LogKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            message: message.into(),
        }
    }
}

/// Speaker of a transcript turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" | "bot" => Ok(Role::Assistant),
            _ => Err(format!("Unknown transcript role: {}", s)),
        }
    }
}

/// One final transcript turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptTurn {
    pub role: Role,
    pub text: String,
}

/// A line in the order cart
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartLineItem {
    /// Opaque identity: timestamp-derived locally, database id remotely
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modification: Option<String>,
    pub price: f64,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

impl CartLineItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>, price: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            size: None,
            modification: None,
            price,
            quantity: 1,
        }
    }

    pub fn with_modification(mut self, modification: Option<String>) -> Self {
        self.modification = modification;
        self
    }

    /// Price times quantity
    pub fn line_total(&self) -> f64 {
        self.price * self.quantity as f64
    }
}

/// Voice assistant persona selected at call start
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Agent {
    /// Zayup intro bot
    Intro,
    /// Ordering demo bot with cart tools
    #[default]
    Demo,
}

impl Agent {
    /// Name spoken in logs when the call connects
    pub fn display_name(&self) -> &'static str {
        match self {
            Agent::Intro => "Zayup AI",
            Agent::Demo => "Ava",
        }
    }
}

impl std::fmt::Display for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Agent::Intro => f.write_str("intro"),
            Agent::Demo => f.write_str("demo"),
        }
    }
}

impl std::str::FromStr for Agent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "intro" | "zayup" => Ok(Agent::Intro),
            "demo" | "ava" => Ok(Agent::Demo),
            _ => Err(format!("Unknown agent: {}", s)),
        }
    }
}

/// Error types for the ordering session
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum OrderingError {
    #[error("Voice SDK public key not configured")]
    MissingVoiceKey,

    #[error("No assistant configured for agent '{0}'")]
    MissingAssistant(String),

    #[error("Voice SDK error: {0}")]
    VoiceError(String),
}
