//! ============================================================================
//! Cart Proxy - serverless proxy to the external ordering API
//! ============================================================================
//! Every call is `POST {project}/functions/v1/{function}` with body
//! `{ action, payload }`. The payload always carries `session_id`.
//! A non-2xx reply carries `{ error: string }`.
//! ============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::BackendConfig;

/// Action tag understood by the proxy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyAction {
    StartSession,
    ExportMenu,
    AddItem,
    ModifyItem,
    RemoveItem,
    ValidateOrder,
}

impl ProxyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyAction::StartSession => "start-session",
            ProxyAction::ExportMenu => "export-menu",
            ProxyAction::AddItem => "add-item",
            ProxyAction::ModifyItem => "modify-item",
            ProxyAction::RemoveItem => "remove-item",
            ProxyAction::ValidateOrder => "validate-order",
        }
    }
}

impl std::fmt::Display for ProxyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProxyAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start-session" => Ok(ProxyAction::StartSession),
            "export-menu" => Ok(ProxyAction::ExportMenu),
            "add-item" => Ok(ProxyAction::AddItem),
            "modify-item" => Ok(ProxyAction::ModifyItem),
            "remove-item" => Ok(ProxyAction::RemoveItem),
            "validate-order" => Ok(ProxyAction::ValidateOrder),
            _ => Err(format!(
                "Unknown proxy action '{}'. Valid: start-session, export-menu, add-item, modify-item, remove-item, validate-order",
                s
            )),
        }
    }
}

/// Proxy failure. The dispatcher treats every variant the same way.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProxyError {
    #[error("Proxy request failed: {0}")]
    Transport(String),

    #[error("Proxy rejected {action} ({status}): {message}")]
    Rejected {
        action: ProxyAction,
        status: u16,
        message: String,
    },

    #[error("Failed to parse proxy response: {0}")]
    Decode(String),
}

/// Item sent with `add-item`
#[derive(Debug, Clone, Serialize)]
pub struct NewCartItem {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub modifications: Vec<String>,
    pub price: f64,
}

/// Contact details sent with `validate-order`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContactInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Outbound cart command channel
#[async_trait]
pub trait CartCommands: Send + Sync {
    /// Send one action. `payload` must be a JSON object; `session_id` is
    /// merged in.
    async fn call(&self, action: ProxyAction, session_id: &str, payload: Value) -> Result<Value, ProxyError>;

    async fn start_session(&self, session_id: &str) -> Result<Value, ProxyError> {
        self.call(ProxyAction::StartSession, session_id, json!({})).await
    }

    async fn export_menu(&self, session_id: &str) -> Result<Value, ProxyError> {
        self.call(ProxyAction::ExportMenu, session_id, json!({})).await
    }

    async fn add_item(&self, session_id: &str, item: &NewCartItem) -> Result<Value, ProxyError> {
        let payload = serde_json::to_value(item).map_err(|e| ProxyError::Decode(e.to_string()))?;
        self.call(ProxyAction::AddItem, session_id, payload).await
    }

    async fn modify_item(
        &self,
        session_id: &str,
        item_id: &str,
        modifications: Vec<String>,
    ) -> Result<Value, ProxyError> {
        self.call(
            ProxyAction::ModifyItem,
            session_id,
            json!({ "item_id": item_id, "modifications": modifications }),
        )
        .await
    }

    async fn remove_item(&self, session_id: &str, item_id: &str) -> Result<Value, ProxyError> {
        self.call(ProxyAction::RemoveItem, session_id, json!({ "item_id": item_id }))
            .await
    }

    async fn validate_order(&self, session_id: &str, contact: &ContactInfo) -> Result<Value, ProxyError> {
        let payload = serde_json::to_value(contact).map_err(|e| ProxyError::Decode(e.to_string()))?;
        self.call(ProxyAction::ValidateOrder, session_id, payload).await
    }
}

/// Merge `session_id` into an object payload
pub(crate) fn with_session(session_id: &str, payload: Value) -> Value {
    let mut body = match payload {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("data".into(), other);
            map
        }
    };
    body.insert("session_id".into(), Value::String(session_id.to_string()));
    Value::Object(body)
}

/// Extract the error text of a failed proxy reply
pub(crate) fn error_message(status: u16, body: &str) -> String {
    match serde_json::from_str::<ProxyErrorBody>(body) {
        Ok(parsed) => parsed.error,
        Err(_) if !body.trim().is_empty() => body.trim().to_string(),
        Err(_) => format!("HTTP {}", status),
    }
}

#[derive(Debug, Deserialize)]
struct ProxyErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct ProxyRequest<'a> {
    action: ProxyAction,
    payload: &'a Value,
}

/// reqwest client for the serverless cart proxy
pub struct CartProxy {
    client: reqwest::Client,
    endpoint: String,
    anon_key: String,
}

impl CartProxy {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/functions/v1/{}", config.base(), config.proxy_function),
            anon_key: config.anon_key.clone(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CartCommands for CartProxy {
    async fn call(&self, action: ProxyAction, session_id: &str, payload: Value) -> Result<Value, ProxyError> {
        let payload = with_session(session_id, payload);
        info!("Proxy {} for session {}", action, session_id);
        debug!("Proxy payload: {}", payload);

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.anon_key))
            .header("apikey", &self.anon_key)
            .header("Content-Type", "application/json")
            .json(&ProxyRequest { action, payload: &payload })
            .send()
            .await
            .map_err(|e| ProxyError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProxyError::Transport(e.to_string()))?;

        if !status.is_success() {
            let message = error_message(status.as_u16(), &body);
            warn!("Proxy {} rejected with {}: {}", action, status, message);
            return Err(ProxyError::Rejected {
                action,
                status: status.as_u16(),
                message,
            });
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| ProxyError::Decode(e.to_string()))
    }
}
