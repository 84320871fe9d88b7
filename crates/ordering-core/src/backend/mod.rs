//! ============================================================================
//! Backend Module - backend-as-a-service collaborators
//! ============================================================================
//! - CartProxy: serverless proxy in front of the ordering API (one request
//!   per cart command)
//! - CartFeed: initial cart snapshot plus realtime change subscription
//! ============================================================================

mod proxy;
mod realtime;

#[cfg(test)]
pub(crate) mod testing;

pub use proxy::{CartCommands, CartProxy, ContactInfo, NewCartItem, ProxyAction, ProxyError};
pub use realtime::{parse_frame, CartFeed, CartRow, FeedSubscription};

/// Connection settings for the backend-as-a-service project
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Project base URL, e.g. `https://abc.supabase.co`
    pub url: String,
    /// Publishable (anon) key sent as `apikey` and bearer token
    pub anon_key: String,
    /// Name of the serverless cart proxy function
    pub proxy_function: String,
}

impl BackendConfig {
    pub(crate) fn base(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}
