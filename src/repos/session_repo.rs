//! Session/grant store contract and the in-memory implementation.
//!
//! A session binds an authentication event, the admitted request, the minted
//! subject identifier and any issued code/tokens to a session key. The flow
//! controller never does read-modify-write on a session itself; mutations
//! like `upgrade_to_token` are single logical operations of the store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::repos::error::{RepoError, RepoResult};
use crate::services::authz::request::AuthorizationRequest;

/// A completed authentication. Created exactly once per authentication,
/// immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthnEvent {
    /// Subject identifier as known by the authentication method.
    pub uid: String,
    /// Per-event randomness bound into derived identifiers.
    pub salt: String,
    /// ACR of the method that authenticated the user.
    pub acr: String,
    /// Unix timestamp of the authentication.
    pub timestamp: i64,
}

impl AuthnEvent {
    pub fn new(uid: &str, salt: &str, acr: &str, timestamp: i64) -> Self {
        Self {
            uid: uid.to_string(),
            salt: salt.to_string(),
            acr: acr.to_string(),
            timestamp,
        }
    }
}

/// Which stage of the grant lifecycle the session is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantState {
    /// Authorization code issued, not yet exchanged/upgraded.
    Authorization,
    /// Access token issued.
    Token,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub sid: Uuid,
    pub client_id: String,
    pub authn_event: AuthnEvent,
    /// Snapshot of the admitted request (nonce, claims, scope live here).
    pub request: AuthorizationRequest,
    /// Minted subject identifier, stable per (uid, salt).
    pub sub: String,
    pub grant_state: GrantState,
    pub code: Option<String>,
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    pub id_token: Option<String>,
    /// Permission grant computed by the authorization-policy hook.
    pub permission: Option<String>,
    pub revoked: bool,
}

/// Fields returned by a token upgrade. `refresh_token` stays `None` unless
/// the upgrade was asked to issue one.
#[derive(Debug, Clone)]
pub struct TokenFields {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
}

/// The session/grant store contract.
///
/// Implementations must provide read-your-writes consistency and atomic
/// per-key update; every method here is one logical store operation.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Open a new session for a completed authentication. Mints the session
    /// key, an authorization code and the subject identifier.
    async fn create(&self, authn_event: AuthnEvent, request: &AuthorizationRequest)
    -> RepoResult<Uuid>;

    async fn get(&self, sid: Uuid) -> RepoResult<Option<Session>>;

    async fn set_permission(&self, sid: Uuid, permission: String) -> RepoResult<()>;

    /// Clear the issued code so it can never be redeemed (used when the
    /// response type does not include `code`).
    async fn void_code(&self, sid: Uuid) -> RepoResult<()>;

    async fn set_id_token(&self, sid: Uuid, id_token: String) -> RepoResult<()>;

    /// Mint an access token for the session and move it to the token stage.
    async fn upgrade_to_token(&self, sid: Uuid, issue_refresh: bool) -> RepoResult<TokenFields>;

    async fn is_revoked(&self, sid: Uuid) -> RepoResult<bool>;

    async fn revoke(&self, sid: Uuid) -> RepoResult<()>;

    /// Session keys previously opened for a subject, oldest first.
    async fn sessions_by_subject(&self, sub: &str) -> RepoResult<Vec<Uuid>>;

    async fn authn_event(&self, sid: Uuid) -> RepoResult<Option<AuthnEvent>>;
}

/// Mint a subject identifier from an authentication event (public subject
/// type: the same user gets the same sub towards every client).
pub fn mint_sub(uid: &str, user_salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(uid.as_bytes());
    hasher.update(user_salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Opaque random token (codes, access tokens, salts).
pub fn random_token() -> RepoResult<String> {
    let mut buf = [0u8; 32];
    getrandom::fill(&mut buf).map_err(|e| RepoError::Random(e.to_string()))?;
    Ok(hex::encode(buf))
}

const ACCESS_TOKEN_LIFETIME_SECONDS: u64 = 3600;

/// In-memory session store. Locking granularity is the whole map, which
/// trivially satisfies the atomic per-key update contract.
#[derive(Clone, Default)]
pub struct MemorySessionRepo {
    inner: Arc<RwLock<MemorySessions>>,
}

#[derive(Default)]
struct MemorySessions {
    sessions: HashMap<Uuid, Session>,
    /// sub -> session keys, insertion order.
    by_subject: HashMap<String, Vec<Uuid>>,
}

impl MemorySessionRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionRepo {
    async fn create(
        &self,
        authn_event: AuthnEvent,
        request: &AuthorizationRequest,
    ) -> RepoResult<Uuid> {
        let sid = Uuid::new_v4();
        let code = random_token()?;
        let sub = mint_sub(&authn_event.uid, &authn_event.salt);

        let session = Session {
            sid,
            client_id: request.client_id.clone(),
            authn_event,
            request: request.clone(),
            sub: sub.clone(),
            grant_state: GrantState::Authorization,
            code: Some(code),
            access_token: None,
            token_type: None,
            expires_in: None,
            id_token: None,
            permission: None,
            revoked: false,
        };

        let mut inner = self.inner.write().await;
        inner.sessions.insert(sid, session);
        inner.by_subject.entry(sub).or_default().push(sid);
        Ok(sid)
    }

    async fn get(&self, sid: Uuid) -> RepoResult<Option<Session>> {
        Ok(self.inner.read().await.sessions.get(&sid).cloned())
    }

    async fn set_permission(&self, sid: Uuid, permission: String) -> RepoResult<()> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(&sid)
            .ok_or(RepoError::NoSuchSession)?;
        session.permission = Some(permission);
        Ok(())
    }

    async fn void_code(&self, sid: Uuid) -> RepoResult<()> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(&sid)
            .ok_or(RepoError::NoSuchSession)?;
        session.code = None;
        Ok(())
    }

    async fn set_id_token(&self, sid: Uuid, id_token: String) -> RepoResult<()> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(&sid)
            .ok_or(RepoError::NoSuchSession)?;
        session.id_token = Some(id_token);
        Ok(())
    }

    async fn upgrade_to_token(&self, sid: Uuid, issue_refresh: bool) -> RepoResult<TokenFields> {
        let access_token = random_token()?;
        let refresh_token = if issue_refresh {
            Some(random_token()?)
        } else {
            None
        };

        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(&sid)
            .ok_or(RepoError::NoSuchSession)?;

        // Idempotent per grant: a second upgrade reuses the minted token
        // instead of issuing a fresh one.
        if session.grant_state == GrantState::Token {
            if let Some(existing) = &session.access_token {
                return Ok(TokenFields {
                    access_token: existing.clone(),
                    token_type: session.token_type.clone().unwrap_or_default(),
                    expires_in: session.expires_in,
                    refresh_token: None,
                });
            }
        }

        session.grant_state = GrantState::Token;
        session.access_token = Some(access_token.clone());
        session.token_type = Some("Bearer".to_string());
        session.expires_in = Some(ACCESS_TOKEN_LIFETIME_SECONDS);

        Ok(TokenFields {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: Some(ACCESS_TOKEN_LIFETIME_SECONDS),
            refresh_token,
        })
    }

    async fn is_revoked(&self, sid: Uuid) -> RepoResult<bool> {
        Ok(self
            .inner
            .read()
            .await
            .sessions
            .get(&sid)
            .map(|s| s.revoked)
            .unwrap_or(false))
    }

    async fn revoke(&self, sid: Uuid) -> RepoResult<()> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(&sid)
            .ok_or(RepoError::NoSuchSession)?;
        session.revoked = true;
        Ok(())
    }

    async fn sessions_by_subject(&self, sub: &str) -> RepoResult<Vec<Uuid>> {
        Ok(self
            .inner
            .read()
            .await
            .by_subject
            .get(sub)
            .cloned()
            .unwrap_or_default())
    }

    async fn authn_event(&self, sid: Uuid) -> RepoResult<Option<AuthnEvent>> {
        Ok(self
            .inner
            .read()
            .await
            .sessions
            .get(&sid)
            .map(|s| s.authn_event.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::authz::request::ResponseType;
    use crate::services::authz::request::tests::request;

    fn event(uid: &str) -> AuthnEvent {
        AuthnEvent::new(uid, "salt", "loa-1", 1_700_000_000)
    }

    #[test]
    fn sub_minting_is_deterministic() {
        assert_eq!(mint_sub("diana", "s"), mint_sub("diana", "s"));
        assert_ne!(mint_sub("diana", "s"), mint_sub("diana", "t"));
        assert_ne!(mint_sub("diana", "s"), mint_sub("peter", "s"));
    }

    #[tokio::test]
    async fn create_issues_code_and_indexes_subject() {
        let repo = MemorySessionRepo::new();
        let req = request("c1", &[ResponseType::Code]);
        let sid = repo.create(event("diana"), &req).await.unwrap();

        let session = repo.get(sid).await.unwrap().unwrap();
        assert!(session.code.is_some());
        assert_eq!(session.grant_state, GrantState::Authorization);
        assert_eq!(session.sub, mint_sub("diana", "salt"));

        let sids = repo.sessions_by_subject(&session.sub).await.unwrap();
        assert_eq!(sids, vec![sid]);
    }

    #[tokio::test]
    async fn upgrade_to_token_moves_stage_and_is_idempotent() {
        let repo = MemorySessionRepo::new();
        let req = request("c1", &[ResponseType::Token]);
        let sid = repo.create(event("diana"), &req).await.unwrap();

        let first = repo.upgrade_to_token(sid, false).await.unwrap();
        assert_eq!(first.token_type, "Bearer");
        assert!(first.refresh_token.is_none());

        let second = repo.upgrade_to_token(sid, false).await.unwrap();
        assert_eq!(first.access_token, second.access_token);

        let session = repo.get(sid).await.unwrap().unwrap();
        assert_eq!(session.grant_state, GrantState::Token);
    }

    #[tokio::test]
    async fn void_code_clears_issued_code() {
        let repo = MemorySessionRepo::new();
        let req = request("c1", &[ResponseType::IdToken]);
        let sid = repo.create(event("diana"), &req).await.unwrap();
        repo.void_code(sid).await.unwrap();
        assert!(repo.get(sid).await.unwrap().unwrap().code.is_none());
    }

    #[tokio::test]
    async fn revocation_round_trip() {
        let repo = MemorySessionRepo::new();
        let req = request("c1", &[ResponseType::Code]);
        let sid = repo.create(event("diana"), &req).await.unwrap();
        assert!(!repo.is_revoked(sid).await.unwrap());
        repo.revoke(sid).await.unwrap();
        assert!(repo.is_revoked(sid).await.unwrap());
    }

    #[tokio::test]
    async fn sessions_by_subject_is_oldest_first() {
        let repo = MemorySessionRepo::new();
        let req = request("c1", &[ResponseType::Code]);
        let first = repo.create(event("diana"), &req).await.unwrap();
        let second = repo.create(event("diana"), &req).await.unwrap();
        let sub = mint_sub("diana", "salt");
        assert_eq!(repo.sessions_by_subject(&sub).await.unwrap(), vec![first, second]);
    }
}
