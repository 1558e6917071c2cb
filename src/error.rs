use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::services::authz::error::AuthzError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Authorization failure that must not be redirected (the redirect URI
    /// was never verified). Reported directly as an OAuth error body.
    #[error("{description}")]
    Oauth {
        code: &'static str,
        description: String,
    },

    #[error("not found")]
    NotFound,

    /// Startup misconfiguration. Fatal; never produced while serving.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal server error")]
    Internal,
}

impl From<AuthzError> for AppError {
    fn from(e: AuthzError) -> Self {
        match e {
            AuthzError::Store(_) => AppError::Internal,
            other => AppError::Oauth {
                code: other.oauth_code(),
                description: other.oauth_description(),
            },
        }
    }
}

#[derive(Serialize)]
struct OauthErrorBody {
    error: &'static str,
    error_description: String,
}

#[derive(Serialize)]
struct ErrorResponseBody {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // OAuth failures use the RFC 6749 error shape, everything else the
        // service's own envelope.
        let message = self.to_string();
        match self {
            AppError::Oauth { code, description } => (
                StatusCode::BAD_REQUEST,
                Json(OauthErrorBody {
                    error: code,
                    error_description: description,
                }),
            )
                .into_response(),
            other => {
                let (status, code) = match &other {
                    AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
                    AppError::Oauth { .. } => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
                    AppError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                    AppError::Configuration(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "CONFIGURATION")
                    }
                    AppError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
                };

                let body = ErrorResponseBody {
                    error: ErrorBody { code, message },
                };

                (status, Json(body)).into_response()
            }
        }
    }
}
