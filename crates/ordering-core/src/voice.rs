//! ============================================================================
//! Voice Transport - boundary to the external voice-call SDK
//! ============================================================================
//! The SDK is a black box: we start/stop a call, toggle mute, inject a user
//! message, and receive events on an mpsc channel handed to the transport
//! when it is built.
//!
//! `ScriptedTransport` replays a recorded JSON event script. It backs the
//! CLI replay command and the session tests.
//! ============================================================================

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::types::Role;

/// Event emitted by the voice SDK
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum VoiceEvent {
    CallStart,
    CallEnd,
    SpeechStart,
    SpeechEnd,
    Message(VoiceMessage),
    Error { message: String },
    /// Start handshake rejected; raised by the session's own handshake task
    #[serde(skip)]
    HandshakeFailed { epoch: u64, error: String },
}

/// Inbound message payload as the SDK delivers it
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VoiceMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, rename = "transcriptType", skip_serializing_if = "Option::is_none")]
    pub transcript_type: Option<String>,
    #[serde(default, rename = "functionCall", skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, rename = "toolCallList", skip_serializing_if = "Vec::is_empty")]
    pub tool_call_list: Vec<ToolCall>,
}

/// Legacy `function-call` message body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub parameters: Value,
}

/// Entry of a `tool-calls` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: Option<String>,
    pub function: ToolFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    /// Either a JSON object or a JSON-encoded string
    #[serde(default)]
    pub arguments: Value,
}

impl VoiceMessage {
    /// Role and text of a final transcript, if this is one
    pub fn final_transcript(&self) -> Option<(Role, &str)> {
        if self.kind != "transcript" || self.transcript_type.as_deref() != Some("final") {
            return None;
        }
        let role = self.role.as_deref()?.parse::<Role>().ok()?;
        let text = self.transcript.as_deref()?;
        Some((role, text))
    }

    /// Remote function invocations carried by this message, in order
    pub fn function_calls(&self) -> Vec<(String, Map<String, Value>)> {
        match self.kind.as_str() {
            "function-call" => self
                .function_call
                .iter()
                .map(|call| (call.name.clone(), param_bag(&call.parameters)))
                .collect(),
            "tool-calls" => self
                .tool_call_list
                .iter()
                .map(|call| (call.function.name.clone(), param_bag(&call.function.arguments)))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Coerce SDK arguments into a key-value bag. Anything that is not an object
/// (or a string holding one) becomes an empty bag.
pub fn param_bag(value: &Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map.clone(),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            _ => {
                debug!("Ignoring non-object function arguments: {}", raw);
                Map::new()
            }
        },
        _ => Map::new(),
    }
}

/// Message injected into an active call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundMessage {
    AddMessage { message: ChatMessage },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl OutboundMessage {
    pub fn user(content: impl Into<String>) -> Self {
        OutboundMessage::AddMessage {
            message: ChatMessage {
                role: Role::User,
                content: content.into(),
            },
        }
    }
}

/// Voice SDK surface used by the call session
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Request a new call with the given assistant. Resolves when the SDK
    /// accepts or rejects the request; call-start arrives as an event.
    async fn start(&self, assistant_id: &str) -> Result<()>;

    fn stop(&self);

    fn set_muted(&self, muted: bool);

    fn send(&self, message: OutboundMessage);
}

/// One step of a replay script
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptStep {
    /// Pause before emitting this event
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(flatten)]
    pub event: VoiceEvent,
}

/// Transport that replays a fixed event script once a call starts
pub struct ScriptedTransport {
    events: mpsc::UnboundedSender<VoiceEvent>,
    script: Vec<ScriptStep>,
    reject_start: Option<String>,
    in_call: Arc<AtomicBool>,
    muted: AtomicBool,
    sent: Mutex<Vec<OutboundMessage>>,
}

impl ScriptedTransport {
    pub fn new(events: mpsc::UnboundedSender<VoiceEvent>, script: Vec<ScriptStep>) -> Self {
        Self {
            events,
            script,
            reject_start: None,
            in_call: Arc::new(AtomicBool::new(false)),
            muted: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Load a script from a JSON array of steps
    pub fn from_file(events: mpsc::UnboundedSender<VoiceEvent>, path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read script {}: {}", path.display(), e))?;
        let script: Vec<ScriptStep> = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("Failed to parse script {}: {}", path.display(), e))?;
        info!("Loaded {} script steps from {}", script.len(), path.display());
        Ok(Self::new(events, script))
    }

    /// Make every start request fail with `reason`
    pub fn rejecting(mut self, reason: impl Into<String>) -> Self {
        self.reject_start = Some(reason.into());
        self
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn sent_messages(&self) -> Vec<OutboundMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl VoiceTransport for ScriptedTransport {
    async fn start(&self, assistant_id: &str) -> Result<()> {
        if let Some(reason) = &self.reject_start {
            return Err(anyhow!("{}", reason));
        }

        info!("Scripted call starting with assistant {}", assistant_id);
        self.in_call.store(true, Ordering::SeqCst);

        let events = self.events.clone();
        let script = self.script.clone();
        let in_call = self.in_call.clone();

        tokio::spawn(async move {
            if events.send(VoiceEvent::CallStart).is_err() {
                return;
            }
            for step in script {
                if step.delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(step.delay_ms)).await;
                }
                if !in_call.load(Ordering::SeqCst) {
                    debug!("Script halted: call stopped");
                    return;
                }
                let ends_call = step.event == VoiceEvent::CallEnd;
                if events.send(step.event).is_err() {
                    return;
                }
                if ends_call {
                    in_call.store(false, Ordering::SeqCst);
                    return;
                }
            }
        });

        Ok(())
    }

    fn stop(&self) {
        // Like the real SDK, a stop on a live call is followed by call-end
        if self.in_call.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(VoiceEvent::CallEnd);
        }
    }

    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    fn send(&self, message: OutboundMessage) {
        match self.sent.lock() {
            Ok(mut sent) => sent.push(message),
            Err(_) => warn!("Scripted transport message log poisoned"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_function_call_message() {
        let event: VoiceEvent = serde_json::from_value(json!({
            "event": "message",
            "type": "function-call",
            "functionCall": { "name": "add_item", "parameters": { "name": "Garlic Bread", "price": 5.5 } }
        }))
        .unwrap();

        let VoiceEvent::Message(message) = event else {
            panic!("expected message event");
        };
        let calls = message.function_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "add_item");
        assert_eq!(calls[0].1["price"], json!(5.5));
    }

    #[test]
    fn test_tool_calls_with_string_arguments() {
        let message: VoiceMessage = serde_json::from_value(json!({
            "type": "tool-calls",
            "toolCallList": [
                { "id": "t1", "function": { "name": "remove-item", "arguments": "{\"item_name\":\"Soda\"}" } },
                { "id": "t2", "function": { "name": "captureEmail", "arguments": "not json" } }
            ]
        }))
        .unwrap();

        let calls = message.function_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1["item_name"], json!("Soda"));
        assert!(calls[1].1.is_empty());
    }

    #[test]
    fn test_final_transcript_only() {
        let partial = VoiceMessage {
            kind: "transcript".into(),
            role: Some("user".into()),
            transcript: Some("a large".into()),
            transcript_type: Some("partial".into()),
            ..Default::default()
        };
        assert!(partial.final_transcript().is_none());

        let done = VoiceMessage {
            transcript_type: Some("final".into()),
            transcript: Some("a large pepperoni".into()),
            ..partial
        };
        assert_eq!(done.final_transcript(), Some((Role::User, "a large pepperoni")));
    }

    #[test]
    fn test_outbound_wire_shape() {
        let json = serde_json::to_value(OutboundMessage::user("hi")).unwrap();
        assert_eq!(json, json!({ "type": "add-message", "message": { "role": "user", "content": "hi" } }));
    }

    #[test]
    fn test_script_step_parse() {
        let steps: Vec<ScriptStep> = serde_json::from_value(json!([
            { "event": "speech-end", "delay_ms": 10 },
            { "event": "error", "message": "boom" }
        ]))
        .unwrap();
        assert_eq!(steps[0].delay_ms, 10);
        assert_eq!(steps[0].event, VoiceEvent::SpeechEnd);
        assert_eq!(steps[1].event, VoiceEvent::Error { message: "boom".into() });
    }

    #[tokio::test]
    async fn test_scripted_transport_replays_after_call_start() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = ScriptedTransport::new(
            tx,
            vec![ScriptStep { delay_ms: 0, event: VoiceEvent::SpeechStart }],
        );
        transport.start("assistant").await.unwrap();
        assert_eq!(rx.recv().await, Some(VoiceEvent::CallStart));
        assert_eq!(rx.recv().await, Some(VoiceEvent::SpeechStart));

        transport.stop();
        assert_eq!(rx.recv().await, Some(VoiceEvent::CallEnd));
        // Second stop has no call to end
        transport.stop();
        assert!(rx.try_recv().is_err());
    }
}
