//! ============================================================================
//! Cart Feed - snapshot + realtime subscription for a shared cart table
//! ============================================================================
//! Snapshot: PostgREST `GET /rest/v1/cart_items?session_id=eq.<id>`
//! Changes: Realtime Phoenix websocket, one channel per session filtered on
//! `session_id`. Every `postgres_changes` frame becomes a `CartChange`.
//! ============================================================================

use std::time::Duration;

use anyhow::{anyhow, Result};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use super::BackendConfig;
use crate::cart::CartChange;
use crate::types::CartLineItem;

const CART_TABLE: &str = "cart_items";

/// Phoenix heartbeat interval; the server drops sockets silent for 60s
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Buffered notifications before the reader task waits on the consumer
const CHANGE_BUFFER: usize = 64;

/// Row of the shared cart table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartRow {
    pub id: Value,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub item_name: String,
    #[serde(default)]
    pub size: Option<String>,
    /// JSONB array of strings; anything else reads as no modifications
    #[serde(default)]
    pub modifications: Value,
    #[serde(default)]
    pub quantity: Option<u32>,
    #[serde(default)]
    pub price: Value,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl CartRow {
    pub fn into_line_item(self) -> Option<CartLineItem> {
        let id = id_string(&self.id)?;
        let modifications: Vec<String> = match &self.modifications {
            Value::Array(mods) => mods.iter().filter_map(|m| m.as_str().map(String::from)).collect(),
            _ => Vec::new(),
        };
        Some(CartLineItem {
            id,
            name: self.item_name,
            size: self.size,
            modification: (!modifications.is_empty()).then(|| modifications.join(", ")),
            price: number(&self.price).unwrap_or(0.0),
            quantity: self.quantity.unwrap_or(1),
        })
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Postgres numerics arrive either as JSON numbers or as strings
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct PhoenixFrame {
    #[serde(default)]
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
}

/// Decode one websocket text frame into a cart change, if it carries one
pub fn parse_frame(text: &str) -> Option<CartChange> {
    let frame: PhoenixFrame = serde_json::from_str(text).ok()?;
    if frame.event != "postgres_changes" {
        return None;
    }
    let data = frame.payload.get("data")?;
    if let Some(table) = data.get("table").and_then(Value::as_str) {
        if table != CART_TABLE {
            return None;
        }
    }

    let row = |key: &str| -> Option<CartLineItem> {
        serde_json::from_value::<CartRow>(data.get(key)?.clone())
            .ok()?
            .into_line_item()
    };

    let kind = data
        .get("type")
        .or_else(|| data.get("eventType"))
        .and_then(Value::as_str)?;
    debug!("Realtime {} on {}", kind, frame.topic);

    match kind {
        "INSERT" => row("record").map(CartChange::Insert),
        "UPDATE" => row("record").map(CartChange::Update),
        "DELETE" => {
            let id = id_string(data.get("old_record")?.get("id")?)?;
            Some(CartChange::Delete { id })
        }
        _ => None,
    }
}

fn topic(session_id: &str) -> String {
    format!("realtime:cart-{}", session_id)
}

fn join_frame(session_id: &str, access_token: &str) -> Value {
    json!({
        "topic": topic(session_id),
        "event": "phx_join",
        "payload": {
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": "*",
                    "schema": "public",
                    "table": CART_TABLE,
                    "filter": format!("session_id=eq.{}", session_id),
                }],
            },
            "access_token": access_token,
        },
        "ref": "1",
    })
}

fn heartbeat_frame(reference: u64) -> Value {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": reference.to_string(),
    })
}

/// Client for the shared cart table
pub struct CartFeed {
    client: reqwest::Client,
    config: BackendConfig,
}

impl CartFeed {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn rows_url(&self, session_id: &str, ordered: bool) -> Result<Url> {
        let base = format!("{}/rest/v1/{}", self.config.base(), CART_TABLE);
        let filter = format!("eq.{}", session_id);
        let mut params = vec![("session_id", filter.as_str())];
        if ordered {
            params.push(("select", "*"));
            params.push(("order", "created_at.asc"));
        }
        Url::parse_with_params(&base, &params).map_err(|e| anyhow!("Invalid backend URL: {}", e))
    }

    pub(crate) fn websocket_url(&self) -> Result<Url> {
        let mut url = Url::parse(self.config.base()).map_err(|e| anyhow!("Invalid backend URL: {}", e))?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => return Err(anyhow!("Unsupported backend scheme: {}", other)),
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow!("Failed to switch backend URL to {}", scheme))?;
        url.set_path("/realtime/v1/websocket");
        url.query_pairs_mut()
            .clear()
            .append_pair("apikey", &self.config.anon_key)
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }

    /// Fetch the current rows for a session, oldest first
    pub async fn snapshot(&self, session_id: &str) -> Result<Vec<CartLineItem>> {
        let url = self.rows_url(session_id, true)?;
        debug!("Fetching cart snapshot: {}", url);

        let response = self
            .client
            .get(url)
            .header("apikey", &self.config.anon_key)
            .header("Authorization", format!("Bearer {}", self.config.anon_key))
            .send()
            .await
            .map_err(|e| anyhow!("Failed to fetch cart: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Cart snapshot error {}: {}", status, body));
        }

        let rows: Vec<CartRow> = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse cart rows: {}", e))?;

        let items: Vec<CartLineItem> = rows.into_iter().filter_map(CartRow::into_line_item).collect();
        info!("Cart snapshot for {}: {} items", session_id, items.len());
        Ok(items)
    }

    /// Delete every row of a session
    pub async fn clear(&self, session_id: &str) -> Result<()> {
        let url = self.rows_url(session_id, false)?;
        let response = self
            .client
            .delete(url)
            .header("apikey", &self.config.anon_key)
            .header("Authorization", format!("Bearer {}", self.config.anon_key))
            .send()
            .await
            .map_err(|e| anyhow!("Failed to clear cart: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Cart clear error {}: {}", status, body));
        }

        info!("Cleared cart for {}", session_id);
        Ok(())
    }

    /// Open the realtime channel for a session
    pub async fn subscribe(&self, session_id: &str) -> Result<FeedSubscription> {
        let url = self.websocket_url()?;
        info!("Subscribing to cart changes for {}", session_id);

        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| anyhow!("Realtime connect failed: {}", e))?;
        let (mut write, mut read) = ws.split();

        write
            .send(Message::Text(join_frame(session_id, &self.config.anon_key).to_string()))
            .await
            .map_err(|e| anyhow!("Realtime join failed: {}", e))?;

        let (tx, rx) = mpsc::channel(CHANGE_BUFFER);
        let session = session_id.to_string();

        let task = tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            let mut reference: u64 = 1;

            loop {
                tokio::select! {
                    frame = read.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(change) = parse_frame(&text) {
                                if tx.send(change).await.is_err() {
                                    debug!("Cart feed consumer gone for {}", session);
                                    break;
                                }
                            } else if text.contains("\"phx_error\"") {
                                warn!("Realtime channel error for {}: {}", session, text);
                            }
                        }
                        Some(Ok(Message::Close(reason))) => {
                            info!("Realtime socket closed for {}: {:?}", session, reason);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Realtime socket error for {}: {}", session, e);
                            break;
                        }
                        None => break,
                    },
                    _ = heartbeat.tick() => {
                        reference += 1;
                        let frame = heartbeat_frame(reference).to_string();
                        if write.send(Message::Text(frame)).await.is_err() {
                            warn!("Realtime heartbeat failed for {}", session);
                            break;
                        }
                    }
                }
            }
        });

        Ok(FeedSubscription { changes: rx, task })
    }
}

/// Live subscription; dropping it closes the socket
pub struct FeedSubscription {
    changes: mpsc::Receiver<CartChange>,
    task: JoinHandle<()>,
}

impl FeedSubscription {
    /// Next change, or `None` once the socket is gone
    pub async fn recv(&mut self) -> Option<CartChange> {
        self.changes.recv().await
    }

    /// Underlying channel, for selecting alongside other event sources
    pub fn changes_mut(&mut self) -> &mut mpsc::Receiver<CartChange> {
        &mut self.changes
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
