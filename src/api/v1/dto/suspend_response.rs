use serde::Serialize;
use uuid::Uuid;

use crate::services::authz::authn::{AuthnArgs, AuthnPrompt};
use crate::services::authz::flow::SuspendDescriptor;

/// Body returned when the flow suspends for interactive authentication.
#[derive(Debug, Serialize)]
pub struct SuspendResponse {
    pub continuation: Uuid,
    pub acr: String,
    pub prompt: AuthnPrompt,
    pub args: AuthnArgs,
}

impl From<SuspendDescriptor> for SuspendResponse {
    fn from(d: SuspendDescriptor) -> Self {
        Self {
            continuation: d.continuation,
            acr: d.acr,
            prompt: d.prompt,
            args: d.args,
        }
    }
}
