//! Pluggable authentication methods and the broker that selects them.
//!
//! A method is selectable by its ACR value and a numeric level. The broker
//! keeps `(method, acr, level)` tuples in registration order and supports
//! three lookup modes: exact ACR match, "better" (lowest level at or above a
//! baseline) and "any" (first registered, last resort).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::services::authz::cookie::{CookieCodec, CookieError};
use crate::services::authz::request::AuthorizationRequest;

/// An established end-user identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub uid: String,
    /// Per-event randomness; empty when the method doesn't carry one.
    pub salt: String,
}

impl Identity {
    pub fn new(uid: &str) -> Self {
        Self {
            uid: uid.to_string(),
            salt: String::new(),
        }
    }
}

/// Recognized lookup failures. All of them mean "no current identity" to the
/// flow, but they are logged apart.
#[derive(Debug, Error, PartialEq)]
pub enum AuthnLookupError {
    #[error("no such authentication")]
    NoSuchAuthentication,

    #[error("credential failed tamper check")]
    Tampered,

    #[error("authentication too old")]
    TooOld,
}

impl From<CookieError> for AuthnLookupError {
    fn from(e: CookieError) -> Self {
        match e {
            CookieError::Tamper | CookieError::Seal => AuthnLookupError::Tampered,
            CookieError::TooOld => AuthnLookupError::TooOld,
        }
    }
}

/// Arguments gathered for an interactive authentication attempt: client
/// metadata for the login page plus an echo of the request so the flow can
/// be resumed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuthnArgs {
    pub acr: String,
    /// The authorization request re-encoded as a query string.
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tos_uri: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub ui_locales: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub acr_values: Vec<String>,
}

/// How the caller should run a suspended authentication out-of-band.
#[derive(Debug, Clone, Serialize)]
pub struct AuthnPrompt {
    /// Method discriminator, e.g. "cookie".
    pub kind: &'static str,
    /// Where to send the user agent, when the method is interactive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
}

/// A pluggable authentication method.
#[async_trait]
pub trait AuthenticationMethod: Send + Sync {
    /// Describe how to start this method interactively for the given args.
    fn authenticate(&self, args: &AuthnArgs) -> AuthnPrompt;

    /// Determine an existing identity from a presented credential.
    ///
    /// `max_age == 0` accepts any existing authentication regardless of age.
    /// Returns the identity and the timestamp of the authentication it is
    /// based on.
    async fn authenticated_as(
        &self,
        credential: Option<&str>,
        max_age: u64,
        now: DateTime<Utc>,
    ) -> Result<(Identity, i64), AuthnLookupError>;

    /// Whether the prior authentication for this request is *not* freshly
    /// done (a fresh completion is marked on the request itself).
    fn done(&self, request: &AuthorizationRequest) -> bool;
}

struct BrokerEntry {
    method: Arc<dyn AuthenticationMethod>,
    acr: String,
    level: u32,
}

/// Ordered registry of authentication methods.
#[derive(Default)]
pub struct AuthnBroker {
    entries: Vec<BrokerEntry>,
}

impl AuthnBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, method: Arc<dyn AuthenticationMethod>, acr: &str, level: u32) {
        self.entries.push(BrokerEntry {
            method,
            acr: acr.to_string(),
            level,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First method registered under exactly this ACR.
    pub fn pick_exact(&self, acr: &str) -> Option<(Arc<dyn AuthenticationMethod>, String)> {
        self.entries
            .iter()
            .find(|e| e.acr == acr)
            .map(|e| (e.method.clone(), e.acr.clone()))
    }

    /// Lowest-level method with level >= `baseline`; registration order
    /// breaks ties.
    pub fn pick_better(&self, baseline: u32) -> Option<(Arc<dyn AuthenticationMethod>, String)> {
        self.entries
            .iter()
            .filter(|e| e.level >= baseline)
            .min_by_key(|e| e.level)
            .map(|e| (e.method.clone(), e.acr.clone()))
    }

    /// First registered method, regardless of level.
    pub fn pick_any(&self) -> Option<(Arc<dyn AuthenticationMethod>, String)> {
        self.entries
            .first()
            .map(|e| (e.method.clone(), e.acr.clone()))
    }

    /// Every distinct ACR value, registration order. Advertised in the
    /// provider metadata.
    pub fn acr_values(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for e in &self.entries {
            if !seen.contains(&e.acr) {
                seen.push(e.acr.clone());
            }
        }
        seen
    }
}

/// The shipping method: verifies the signed session cookie and suspends to
/// an interactive login form otherwise.
pub struct CookieAuthn {
    codec: Arc<CookieCodec>,
    login_url: String,
}

impl CookieAuthn {
    pub fn new(codec: Arc<CookieCodec>, login_url: &str) -> Self {
        Self {
            codec,
            login_url: login_url.to_string(),
        }
    }
}

#[async_trait]
impl AuthenticationMethod for CookieAuthn {
    fn authenticate(&self, args: &AuthnArgs) -> AuthnPrompt {
        AuthnPrompt {
            kind: "cookie",
            action_url: Some(format!("{}?{}", self.login_url, args.query)),
        }
    }

    async fn authenticated_as(
        &self,
        credential: Option<&str>,
        max_age: u64,
        now: DateTime<Utc>,
    ) -> Result<(Identity, i64), AuthnLookupError> {
        let raw = credential.ok_or(AuthnLookupError::NoSuchAuthentication)?;
        let (uid, ts) = self.codec.open(raw, max_age, now)?;
        Ok((Identity::new(&uid), ts))
    }

    fn done(&self, request: &AuthorizationRequest) -> bool {
        // upm_answer marks a just-completed interactive round.
        !request.upm_answer
    }
}
