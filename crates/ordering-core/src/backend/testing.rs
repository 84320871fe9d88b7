//! Fake cart command channel for unit tests

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::proxy::with_session;
use super::{CartCommands, ProxyAction, ProxyError};

/// Records every call; fails all of them when `fail` is set
#[derive(Default)]
pub struct RecordingCommands {
    pub fail: bool,
    calls: Mutex<Vec<(ProxyAction, Value)>>,
}

impl RecordingCommands {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<(ProxyAction, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CartCommands for RecordingCommands {
    async fn call(&self, action: ProxyAction, session_id: &str, payload: Value) -> Result<Value, ProxyError> {
        self.calls
            .lock()
            .unwrap()
            .push((action, with_session(session_id, payload)));
        if self.fail {
            return Err(ProxyError::Rejected {
                action,
                status: 500,
                message: "RP2A_API_URL not configured".into(),
            });
        }
        Ok(serde_json::json!({ "ok": true }))
    }
}
