use std::collections::BTreeSet;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::AppError;
use crate::services::authz::request::{
    AuthorizationRequest, ClaimsRequest, Prompt, ResponseMode, ResponseType,
};

/// Raw query parameters of `GET /authorization`.
///
/// Everything structurally invalid (unknown response_type token, bad claims
/// JSON) is rejected here, before the flow controller sees the request.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeParams {
    pub client_id: Option<String>,
    /// Space-separated response type tokens.
    pub response_type: Option<String>,
    pub redirect_uri: Option<String>,
    /// Space-separated scope values.
    pub scope: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    /// The `claims` parameter, a JSON object.
    pub claims: Option<String>,
    /// Space-separated prompt directives.
    pub prompt: Option<String>,
    pub max_age: Option<u64>,
    /// Space-separated ACR values, preference order.
    pub acr_values: Option<String>,
    /// Space-separated locale tags.
    pub ui_locales: Option<String>,
    pub response_mode: Option<String>,
    #[serde(default)]
    pub upm_answer: bool,
    pub req_user: Option<String>,
}

impl AuthorizeParams {
    pub fn into_request(self) -> Result<AuthorizationRequest, AppError> {
        let client_id = self
            .client_id
            .ok_or_else(|| AppError::InvalidRequest("client_id is required".to_string()))?;
        let redirect_uri = self
            .redirect_uri
            .ok_or_else(|| AppError::InvalidRequest("redirect_uri is required".to_string()))?;

        let response_type = self
            .response_type
            .ok_or_else(|| AppError::InvalidRequest("response_type is required".to_string()))?
            .split_whitespace()
            .map(ResponseType::from_str)
            .collect::<Result<Vec<_>, _>>()
            .map_err(AppError::InvalidRequest)?;
        if response_type.is_empty() {
            return Err(AppError::InvalidRequest(
                "response_type is required".to_string(),
            ));
        }

        let scope: BTreeSet<String> = self
            .scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let prompt: BTreeSet<Prompt> = self
            .prompt
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(Prompt::from_str)
            .collect::<Result<_, _>>()
            .map_err(AppError::InvalidRequest)?;

        let claims: Option<ClaimsRequest> = match self.claims.as_deref() {
            Some(raw) => Some(
                serde_json::from_str(raw)
                    .map_err(|_| AppError::InvalidRequest("malformed claims".to_string()))?,
            ),
            None => None,
        };

        let response_mode = match self.response_mode.as_deref() {
            Some(raw) => Some(ResponseMode::from_str(raw).map_err(AppError::InvalidRequest)?),
            None => None,
        };

        let acr_values = split_list(self.acr_values.as_deref());
        let ui_locales = split_list(self.ui_locales.as_deref());

        Ok(AuthorizationRequest {
            client_id,
            response_type,
            redirect_uri,
            scope,
            state: self.state,
            nonce: self.nonce,
            claims,
            prompt,
            max_age: self.max_age,
            request_object_max_age: None,
            acr_values,
            ui_locales,
            response_mode,
            upm_answer: self.upm_answer,
            req_user: self.req_user,
        })
    }
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}
