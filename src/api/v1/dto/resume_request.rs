use serde::Deserialize;
use uuid::Uuid;

/// Request body for `POST /authorization/resume`.
///
/// Posted by the out-of-band authenticator once it has established an
/// identity for a suspended flow.
#[derive(Debug, Clone, Deserialize)]
pub struct ResumeRequest {
    /// Continuation token from the suspension descriptor.
    pub continuation: Uuid,

    /// Authenticated subject identifier.
    pub uid: String,

    /// Per-event randomness, when the authenticator minted one.
    pub salt: Option<String>,
}
