//! Response-type resolution and response-parameter assembly.
//!
//! Given the resolved response-type set and an open session, decide what to
//! produce (code / access token / id_token), whether fragment encoding is
//! mandatory, and fill the response parameters accordingly.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::Map;
use tracing::debug;
use uuid::Uuid;

use crate::repos::session_repo::SessionStore;
use crate::services::authz::error::AuthzError;
use crate::services::authz::id_token::{IdTokenHint, IdTokenSigner};
use crate::services::authz::request::{AuthorizationRequest, ClaimsLocation, ResponseType};
use crate::services::authz::userinfo::ClaimsSource;

/// The authorization response parameters. Everything optional; what is
/// populated depends on the response type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthzResponseParams {
    pub code: Option<String>,
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    pub id_token: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub iss: Option<String>,
    pub client_id: Option<String>,
}

impl AuthzResponseParams {
    /// Error-response parameters for a failed request.
    pub fn from_error(err: &AuthzError, state: Option<&str>) -> Self {
        Self {
            error: Some(err.oauth_code().to_string()),
            error_description: Some(err.oauth_description()),
            state: state.map(str::to_string),
            ..Default::default()
        }
    }

    /// Populated parameters as encode-ready pairs, stable order.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(v) = &self.code {
            pairs.push(("code", v.clone()));
        }
        if let Some(v) = &self.access_token {
            pairs.push(("access_token", v.clone()));
        }
        if let Some(v) = &self.token_type {
            pairs.push(("token_type", v.clone()));
        }
        if let Some(v) = self.expires_in {
            pairs.push(("expires_in", v.to_string()));
        }
        if let Some(v) = &self.id_token {
            pairs.push(("id_token", v.clone()));
        }
        if let Some(v) = &self.scope {
            pairs.push(("scope", v.clone()));
        }
        if let Some(v) = &self.state {
            pairs.push(("state", v.clone()));
        }
        if let Some(v) = &self.error {
            pairs.push(("error", v.clone()));
        }
        if let Some(v) = &self.error_description {
            pairs.push(("error_description", v.clone()));
        }
        if let Some(v) = &self.iss {
            pairs.push(("iss", v.clone()));
        }
        if let Some(v) = &self.client_id {
            pairs.push(("client_id", v.clone()));
        }
        pairs
    }
}

/// Assembled response plus the encoding obligation that goes with it.
#[derive(Debug, Clone)]
pub struct ResponseInfo {
    pub params: AuthzResponseParams,
    /// Whether OIDC requires fragment delivery for what was produced.
    pub fragment_enc: bool,
}

/// Whether a response-type set mandates fragment encoding: everything except
/// exactly `{code}` or `{none}` does.
pub fn requires_fragment(rtype: &BTreeSet<ResponseType>) -> bool {
    let code_only = rtype.len() == 1 && rtype.contains(&ResponseType::Code);
    let none_only = rtype.len() == 1 && rtype.contains(&ResponseType::None);
    !(code_only || none_only)
}

/// Build the success response parameters for an authorized session.
pub async fn create_authn_response(
    sessions: &dyn SessionStore,
    signer: &IdTokenSigner,
    claims_source: &dyn ClaimsSource,
    request: &AuthorizationRequest,
    sid: Uuid,
    now: DateTime<Utc>,
) -> Result<ResponseInfo, AuthzError> {
    let mut params = AuthzResponseParams {
        state: request.state.clone(),
        ..Default::default()
    };

    let rtype = request.response_type_set();

    if rtype.len() == 1 && rtype.contains(&ResponseType::None) {
        return Ok(ResponseInfo {
            params,
            fragment_enc: false,
        });
    }

    if !request.scope.is_empty() {
        params.scope = Some(request.scope.iter().cloned().collect::<Vec<_>>().join(" "));
    }

    let fragment_enc = requires_fragment(&rtype);
    let mut handled: BTreeSet<ResponseType> = BTreeSet::new();

    let session = sessions
        .get(sid)
        .await?
        .ok_or(crate::repos::error::RepoError::NoSuchSession)?;

    if rtype.contains(&ResponseType::Code) {
        params.code = session.code.clone();
        handled.insert(ResponseType::Code);
    } else {
        // Make sure a code minted at session setup can never be redeemed.
        sessions.void_code(sid).await?;
    }

    if rtype.contains(&ResponseType::Token) {
        let fields = sessions.upgrade_to_token(sid, false).await?;
        debug!(sid = %sid, "upgraded session to token");
        params.access_token = Some(fields.access_token);
        params.token_type = Some(fields.token_type);
        params.expires_in = fields.expires_in;
        handled.insert(ResponseType::Token);
    }

    if rtype.contains(&ResponseType::IdToken) {
        let uid = &session.authn_event.uid;
        let requested = request.requested_claim_names(ClaimsLocation::IdToken);
        let mut user_claims: Map<_, _> = claims_source.claims_for(uid, &requested);
        if rtype.len() == 1 {
            // Pure id_token response: the token is the only claims carrier.
            user_claims.extend(claims_source.all_claims(uid));
        }

        let hint = match (params.code.clone(), params.access_token.clone()) {
            (Some(code), Some(access_token)) => IdTokenHint::CodeAndToken { code, access_token },
            (Some(code), None) => IdTokenHint::Code { code },
            (None, Some(access_token)) => IdTokenHint::Token { access_token },
            (None, None) => IdTokenHint::None,
        };

        let id_token = signer
            .sign(&session, &request.client_id, user_claims, &hint, now)
            .map_err(|e| {
                tracing::warn!(error = %e, client_id = %request.client_id, "id_token signing failed");
                AuthzError::InvalidRequest("could not sign/encrypt id_token".to_string())
            })?;

        sessions.set_id_token(sid, id_token.clone()).await?;
        params.id_token = Some(id_token);
        handled.insert(ResponseType::IdToken);
    }

    let not_handled: Vec<ResponseType> = rtype.difference(&handled).copied().collect();
    if !not_handled.is_empty() {
        return Err(AuthzError::UnsupportedResponseType(not_handled));
    }

    Ok(ResponseInfo {
        params,
        fragment_enc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repos::session_repo::{AuthnEvent, MemorySessionRepo};
    use crate::services::authz::id_token::tests::TEST_ED25519_PEM;
    use crate::services::authz::request::ClaimsRequest;
    use crate::services::authz::request::tests::request;
    use crate::services::authz::userinfo::StaticClaims;
    use std::collections::BTreeMap;
    use base64::Engine as _;
    use chrono::TimeZone;
    use serde_json::json;

    struct Fixture {
        sessions: MemorySessionRepo,
        signer: IdTokenSigner,
        claims: StaticClaims,
    }

    fn fixture() -> Fixture {
        let mut claims = StaticClaims::new();
        let mut user = Map::new();
        user.insert("email".to_string(), json!("diana@example.org"));
        user.insert("name".to_string(), json!("Diana Krall"));
        claims.insert("diana", user);

        Fixture {
            sessions: MemorySessionRepo::new(),
            signer: IdTokenSigner::new(TEST_ED25519_PEM, "https://op.example", 300).unwrap(),
            claims,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_100, 0).unwrap()
    }

    async fn open_session(f: &Fixture, req: &AuthorizationRequest) -> Uuid {
        f.sessions
            .create(AuthnEvent::new("diana", "salt", "loa-1", 1_700_000_000), req)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn code_only_is_query_encoded() {
        let f = fixture();
        let mut req = request("c1", &[ResponseType::Code]);
        req.state = Some("s1".to_string());
        let sid = open_session(&f, &req).await;

        let info = create_authn_response(&f.sessions, &f.signer, &f.claims, &req, sid, now())
            .await
            .unwrap();

        assert!(!info.fragment_enc);
        assert!(info.params.code.is_some());
        assert_eq!(info.params.state.as_deref(), Some("s1"));
        assert!(info.params.access_token.is_none());
        assert!(info.params.id_token.is_none());
    }

    #[tokio::test]
    async fn none_produces_nothing() {
        let f = fixture();
        let req = request("c1", &[ResponseType::None]);
        let sid = open_session(&f, &req).await;

        let info = create_authn_response(&f.sessions, &f.signer, &f.claims, &req, sid, now())
            .await
            .unwrap();

        assert!(!info.fragment_enc);
        assert!(info.params.code.is_none());
        assert!(info.params.access_token.is_none());
        assert!(info.params.id_token.is_none());
    }

    #[tokio::test]
    async fn id_token_token_uses_access_token_only_hint() {
        let f = fixture();
        let req = request("c1", &[ResponseType::IdToken, ResponseType::Token]);
        let sid = open_session(&f, &req).await;

        let info = create_authn_response(&f.sessions, &f.signer, &f.claims, &req, sid, now())
            .await
            .unwrap();

        assert!(info.fragment_enc);
        assert!(info.params.access_token.is_some());
        let id_token = info.params.id_token.unwrap();

        // at_hash present, c_hash absent: the "access_token only" shape.
        let payload = id_token.split('.').nth(1).unwrap();
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload)
            .unwrap();
        let claims: Map<String, serde_json::Value> = serde_json::from_slice(&bytes).unwrap();
        assert!(claims.contains_key("at_hash"));
        assert!(!claims.contains_key("c_hash"));

        // No code in the response, and the stored one is voided.
        assert!(info.params.code.is_none());
        let session = f.sessions.get(sid).await.unwrap().unwrap();
        assert!(session.code.is_none());
        assert_eq!(session.id_token, Some(id_token));
    }

    #[tokio::test]
    async fn hybrid_full_set_uses_both_hashes() {
        let f = fixture();
        let req = request(
            "c1",
            &[ResponseType::Code, ResponseType::IdToken, ResponseType::Token],
        );
        let sid = open_session(&f, &req).await;

        let info = create_authn_response(&f.sessions, &f.signer, &f.claims, &req, sid, now())
            .await
            .unwrap();

        assert!(info.fragment_enc);
        let payload = info.params.id_token.unwrap();
        let payload = payload.split('.').nth(1).unwrap();
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload)
            .unwrap();
        let claims: Map<String, serde_json::Value> = serde_json::from_slice(&bytes).unwrap();
        assert!(claims.contains_key("at_hash"));
        assert!(claims.contains_key("c_hash"));
    }

    #[tokio::test]
    async fn pure_id_token_collects_all_claims() {
        let f = fixture();
        let req = request("c1", &[ResponseType::IdToken]);
        let sid = open_session(&f, &req).await;

        let info = create_authn_response(&f.sessions, &f.signer, &f.claims, &req, sid, now())
            .await
            .unwrap();

        let payload = info.params.id_token.unwrap();
        let payload = payload.split('.').nth(1).unwrap();
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload)
            .unwrap();
        let claims: Map<String, serde_json::Value> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(claims["email"], json!("diana@example.org"));
        assert_eq!(claims["name"], json!("Diana Krall"));
    }

    #[tokio::test]
    async fn id_token_embeds_only_id_token_location_claims() {
        let f = fixture();
        let mut req = request("c1", &[ResponseType::IdToken, ResponseType::Token]);
        let mut id_token = BTreeMap::new();
        id_token.insert("email".to_string(), None);
        let mut userinfo = BTreeMap::new();
        userinfo.insert("name".to_string(), None);
        req.claims = Some(ClaimsRequest { id_token, userinfo });
        let sid = open_session(&f, &req).await;

        let info = create_authn_response(&f.sessions, &f.signer, &f.claims, &req, sid, now())
            .await
            .unwrap();

        let payload = info.params.id_token.unwrap();
        let payload = payload.split('.').nth(1).unwrap();
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload)
            .unwrap();
        let claims: Map<String, serde_json::Value> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(claims["email"], json!("diana@example.org"));
        // Userinfo-location claims stay out of the token when an access
        // token travels with it.
        assert!(!claims.contains_key("name"));
    }

    #[tokio::test]
    async fn resolver_is_idempotent() {
        let f = fixture();
        let req = request("c1", &[ResponseType::Code, ResponseType::Token]);
        let sid = open_session(&f, &req).await;

        let first = create_authn_response(&f.sessions, &f.signer, &f.claims, &req, sid, now())
            .await
            .unwrap();
        let second = create_authn_response(&f.sessions, &f.signer, &f.claims, &req, sid, now())
            .await
            .unwrap();

        assert_eq!(first.fragment_enc, second.fragment_enc);
        assert_eq!(first.params, second.params);
    }

    #[tokio::test]
    async fn none_mixed_with_others_is_unsupported() {
        let f = fixture();
        let req = request("c1", &[ResponseType::Code, ResponseType::None]);
        let sid = open_session(&f, &req).await;

        let err = create_authn_response(&f.sessions, &f.signer, &f.claims, &req, sid, now())
            .await
            .unwrap_err();
        match err {
            AuthzError::UnsupportedResponseType(types) => {
                assert_eq!(types, vec![ResponseType::None]);
            }
            other => panic!("expected UnsupportedResponseType, got {other:?}"),
        }
    }
}
