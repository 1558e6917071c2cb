//! Client database contract and the in-memory implementation.
//!
//! Client records are registered out-of-band (the registration endpoint is a
//! separate service); this core only ever reads them.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::repos::error::RepoResult;
use crate::services::authz::redirect_uri::RegisteredQuery;
use crate::services::authz::request::ResponseType;

/// A registered client, read-only to the authorization core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    pub client_id: String,

    /// Registered redirect URIs: (base, optional query constraint), tried in
    /// declaration order.
    pub redirect_uris: Vec<(String, Option<RegisteredQuery>)>,

    /// Allowed response-type combinations. Empty means the OIDC default:
    /// `{code}` only.
    #[serde(default)]
    pub response_types: Vec<BTreeSet<ResponseType>>,

    // Client metadata forwarded to interactive login pages.
    #[serde(default)]
    pub policy_uri: Option<String>,
    #[serde(default)]
    pub logo_uri: Option<String>,
    #[serde(default)]
    pub tos_uri: Option<String>,
}

impl ClientRecord {
    pub fn new(client_id: &str, redirect_uris: Vec<(String, Option<RegisteredQuery>)>) -> Self {
        Self {
            client_id: client_id.to_string(),
            redirect_uris,
            response_types: Vec::new(),
            policy_uri: None,
            logo_uri: None,
            tos_uri: None,
        }
    }

    /// Whether the requested response-type combination is among the
    /// registered ones (default `{code}` if none registered).
    pub fn allows_response_type(&self, requested: &BTreeSet<ResponseType>) -> bool {
        if self.response_types.is_empty() {
            let mut default = BTreeSet::new();
            default.insert(ResponseType::Code);
            return *requested == default;
        }
        self.response_types.iter().any(|rt| rt == requested)
    }
}

/// `get(client_id) -> ClientRecord | not-found`.
///
/// Implementations must be cheap to clone (typically `Arc<...>` inside).
#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn get(&self, client_id: &str) -> RepoResult<Option<ClientRecord>>;
}

/// In-memory client database. Good enough for tests and single-node
/// deployments; production would put a real registry behind `ClientStore`.
#[derive(Clone, Default)]
pub struct MemoryClientRepo {
    clients: Arc<RwLock<HashMap<String, ClientRecord>>>,
}

impl MemoryClientRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: ClientRecord) {
        self.clients
            .write()
            .await
            .insert(record.client_id.clone(), record);
    }
}

#[async_trait]
impl ClientStore for MemoryClientRepo {
    async fn get(&self, client_id: &str) -> RepoResult<Option<ClientRecord>> {
        Ok(self.clients.read().await.get(client_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_response_type_is_code_only() {
        let record = ClientRecord::new("c1", vec![("https://rp.example/cb".to_string(), None)]);

        let mut code = BTreeSet::new();
        code.insert(ResponseType::Code);
        assert!(record.allows_response_type(&code));

        let mut implicit = BTreeSet::new();
        implicit.insert(ResponseType::IdToken);
        implicit.insert(ResponseType::Token);
        assert!(!record.allows_response_type(&implicit));
    }

    #[test]
    fn registered_combinations_are_honored() {
        let mut record = ClientRecord::new("c1", vec![]);
        let mut hybrid = BTreeSet::new();
        hybrid.insert(ResponseType::Code);
        hybrid.insert(ResponseType::IdToken);
        record.response_types = vec![hybrid.clone()];

        assert!(record.allows_response_type(&hybrid));

        let mut code = BTreeSet::new();
        code.insert(ResponseType::Code);
        assert!(!record.allows_response_type(&code));
    }

    #[tokio::test]
    async fn memory_repo_round_trip() {
        let repo = MemoryClientRepo::new();
        repo.insert(ClientRecord::new("c1", vec![])).await;
        assert!(repo.get("c1").await.unwrap().is_some());
        assert!(repo.get("c2").await.unwrap().is_none());
    }
}
