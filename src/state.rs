use std::sync::Arc;

use serde_json::{Map, Value};

use crate::services::authz::cookie::CookieCodec;
use crate::services::authz::flow::AuthorizationFlow;

#[derive(Clone)]
pub struct AppState {
    pub flow: Arc<AuthorizationFlow>,
    pub cookies: Arc<CookieCodec>,
    /// Negotiated once at startup, immutable afterwards.
    pub provider_metadata: Arc<Map<String, Value>>,
}

impl AppState {
    pub fn new(
        flow: Arc<AuthorizationFlow>,
        cookies: Arc<CookieCodec>,
        provider_metadata: Arc<Map<String, Value>>,
    ) -> Self {
        Self {
            flow,
            cookies,
            provider_metadata,
        }
    }
}
