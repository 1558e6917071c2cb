//! Authorization-flow error taxonomy.
//!
//! Every client-facing failure maps onto an OAuth2/OIDC `error` code and a
//! human-readable `error_description`. Whether the error may be *redirected*
//! to the client is not encoded here; the flow controller only redirects
//! after the redirect URI has been verified (see `flow.rs`).

use thiserror::Error;

use crate::services::authz::redirect_uri::RedirectUriError;
use crate::services::authz::request::ResponseType;

#[derive(Debug, Error)]
pub enum AuthzError {
    /// Malformed or unfulfillable request (bad response_mode, signing failure, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// `client_id` not present in the client database.
    #[error("unknown client: {0}")]
    UnknownClient(String),

    /// Client is known but asked for something it never registered.
    #[error("unauthorized client: {0}")]
    UnauthorizedClient(String),

    /// Registered-but-non-matching redirect URI. Implies the client exists.
    #[error("redirect_uri: {0}")]
    RedirectUri(#[from] RedirectUriError),

    #[error("access denied: {0}")]
    AccessDenied(String),

    /// `prompt=none` but no usable identity.
    #[error("login required")]
    LoginRequired,

    /// Response types we don't know how to produce. Carries the offenders.
    #[error("unsupported response type: {}", format_types(.0))]
    UnsupportedResponseType(Vec<ResponseType>),

    /// Store failure underneath the flow. Never surfaced verbatim to clients.
    #[error("store error: {0}")]
    Store(#[from] crate::repos::error::RepoError),
}

fn format_types(types: &[ResponseType]) -> String {
    types
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

impl AuthzError {
    /// The OAuth2 `error` parameter value for this failure.
    pub fn oauth_code(&self) -> &'static str {
        match self {
            AuthzError::InvalidRequest(_) => "invalid_request",
            AuthzError::UnknownClient(_) => "unauthorized_client",
            AuthzError::UnauthorizedClient(_) => "invalid_request",
            AuthzError::RedirectUri(_) => "invalid_request",
            AuthzError::AccessDenied(_) => "access_denied",
            AuthzError::LoginRequired => "login_required",
            AuthzError::UnsupportedResponseType(_) => "unsupported_response_type",
            AuthzError::Store(_) => "server_error",
        }
    }

    /// The `error_description` parameter value.
    pub fn oauth_description(&self) -> String {
        match self {
            // Don't leak store internals to the client.
            AuthzError::Store(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}
