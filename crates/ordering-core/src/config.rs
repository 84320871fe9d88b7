//! ============================================================================
//! Desk Configuration
//! ============================================================================
//! Read from the environment (load `.env` first with dotenvy in the binary).
//! Missing optional values disable the feature that needs them: no voice
//! key means no calls, no backend settings means a local-only cart.
//! ============================================================================

use serde::{Deserialize, Serialize};

use crate::backend::BackendConfig;
use crate::store::{DEFAULT_LOG_CAP, DEFAULT_TRANSCRIPT_CAP};
use crate::types::Agent;

/// Assistant with the cart tools attached
pub const DEFAULT_DEMO_ASSISTANT_ID: &str = "c8951f28-76ac-4c9e-ba73-b51fb6b8af6f";

pub const DEFAULT_PROXY_FUNCTION: &str = "rp2a-proxy";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeskConfig {
    /// Publishable key of the voice SDK
    pub voice_public_key: Option<String>,
    pub intro_assistant_id: Option<String>,
    pub demo_assistant_id: String,
    pub backend_url: Option<String>,
    pub backend_anon_key: Option<String>,
    pub proxy_function: String,
    pub log_cap: usize,
    pub transcript_cap: usize,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            voice_public_key: None,
            intro_assistant_id: None,
            demo_assistant_id: DEFAULT_DEMO_ASSISTANT_ID.to_string(),
            backend_url: None,
            backend_anon_key: None,
            proxy_function: DEFAULT_PROXY_FUNCTION.to_string(),
            log_cap: DEFAULT_LOG_CAP,
            transcript_cap: DEFAULT_TRANSCRIPT_CAP,
        }
    }
}

impl DeskConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        Self {
            voice_public_key: get("VAPI_PUBLIC_KEY").or_else(|| get("VITE_VAPI_PUBLIC_KEY")),
            intro_assistant_id: get("ZAYUP_INTRO_ASSISTANT_ID"),
            demo_assistant_id: get("ZAYUP_DEMO_ASSISTANT_ID").unwrap_or(defaults.demo_assistant_id),
            backend_url: get("SUPABASE_URL").or_else(|| get("VITE_SUPABASE_URL")),
            backend_anon_key: get("SUPABASE_ANON_KEY")
                .or_else(|| get("VITE_SUPABASE_PUBLISHABLE_KEY")),
            proxy_function: get("ZAYUP_PROXY_FUNCTION").unwrap_or(defaults.proxy_function),
            log_cap: get("ZAYUP_LOG_CAP")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.log_cap),
            transcript_cap: get("ZAYUP_TRANSCRIPT_CAP")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.transcript_cap),
        }
    }

    /// Assistant id for `agent`. The intro agent falls back to the demo
    /// assistant until its id is configured.
    pub fn assistant_for(&self, agent: Agent) -> &str {
        match agent {
            Agent::Intro => self
                .intro_assistant_id
                .as_deref()
                .unwrap_or(&self.demo_assistant_id),
            Agent::Demo => &self.demo_assistant_id,
        }
    }

    /// Backend settings, if both URL and key are present
    pub fn backend(&self) -> Option<BackendConfig> {
        Some(BackendConfig {
            url: self.backend_url.clone()?,
            anon_key: self.backend_anon_key.clone()?,
            proxy_function: self.proxy_function.clone(),
        })
    }
}
