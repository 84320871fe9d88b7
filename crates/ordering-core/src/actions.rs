//! ============================================================================
//! Remote Function Actions - name normalization and parameter extraction
//! ============================================================================
//! Assistants spell the same tool several ways (`add_item`, `add-item`,
//! `addItem`). Names are normalized once (lowercase, separators stripped)
//! and mapped into a closed set of actions; anything else is `Unknown`.
//! ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::Agent;

/// Local action behind a remote function call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "name", rename_all = "snake_case")]
pub enum CartAction {
    AddItem,
    ModifyItem,
    RemoveItem,
    CaptureContact,
    SubmitOrder,
    SwitchAgent,
    ExportMenu,
    /// Raw, unnormalized function name
    Unknown(String),
}

impl CartAction {
    /// Map a function name in any of its known spellings
    pub fn parse(name: &str) -> Self {
        match normalize(name).as_str() {
            "additem" => CartAction::AddItem,
            "modifyitem" => CartAction::ModifyItem,
            "removeitem" => CartAction::RemoveItem,
            "captureemail" | "showemail" | "triggeremailinput" | "capturecontact" => {
                CartAction::CaptureContact
            }
            "placeorder" | "submitorder" | "ordervalidate" | "validateorder" => CartAction::SubmitOrder,
            "switchtodemo" | "transfertodemo" | "switchagent" => CartAction::SwitchAgent,
            "menuexport" | "exportmenu" => CartAction::ExportMenu,
            _ => CartAction::Unknown(name.to_string()),
        }
    }
}

/// Lowercase and drop `-`, `_`, `.` and whitespace
pub fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '-' | '_' | '.') && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Parameters of an item-level function call
#[derive(Debug, Clone, PartialEq)]
pub struct ItemParams {
    pub name: Option<String>,
    pub size: Option<String>,
    pub modification: Option<String>,
    pub price: f64,
}

impl ItemParams {
    /// For `add item`: `name` wins over `item_name`
    pub fn for_add(params: &Map<String, Value>) -> Self {
        Self::extract(params, &["name", "item_name"])
    }

    /// For `modify`/`remove`: `item_name` wins over `name`
    pub fn for_target(params: &Map<String, Value>) -> Self {
        Self::extract(params, &["item_name", "name"])
    }

    fn extract(params: &Map<String, Value>, name_keys: &[&str]) -> Self {
        Self {
            name: name_keys.iter().find_map(|key| text(params, key)),
            size: text(params, "size"),
            modification: modification(params),
            price: params.get("price").and_then(price).unwrap_or(0.0),
        }
    }

    /// Modification split back into a list for the proxy
    pub fn modifications(&self) -> Vec<String> {
        self.modification
            .as_deref()
            .map(|m| vec![m.to_string()])
            .unwrap_or_default()
    }
}

/// Target of a switch-agent call; defaults to the demo agent
pub fn agent_param(params: &Map<String, Value>) -> Agent {
    text(params, "agent")
        .or_else(|| text(params, "assistant"))
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(Agent::Demo)
}

/// Non-empty string value
fn text(params: &Map<String, Value>, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// `modification` as text, or `modifications` as a list joined with ", "
fn modification(params: &Map<String, Value>) -> Option<String> {
    if let Some(single) = text(params, "modification") {
        return Some(single);
    }
    match params.get("modifications") {
        Some(Value::Array(list)) => {
            let parts: Vec<&str> = list.iter().filter_map(Value::as_str).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Number or numeric string; non-finite values read as absent
fn price(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_start_matches('$').parse().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}
