use axum::{
    Router,
    routing::{get, post},
};

use crate::api::v1::handlers::authorization::{authorize, resume};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/authorization", get(authorize))
        .route("/authorization/resume", post(resume))
}
