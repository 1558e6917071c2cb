use axum::Json;
use axum::extract::State;
use serde_json::{Map, Value};

use crate::state::AppState;

/// `GET /.well-known/openid-configuration`: the provider metadata negotiated
/// at startup.
pub async fn discovery(State(state): State<AppState>) -> Json<Map<String, Value>> {
    Json(state.provider_metadata.as_ref().clone())
}
