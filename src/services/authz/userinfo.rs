//! User-claims source consumed by the ID-token assembler.
//!
//! Full claims aggregation lives in a separate service; this is only the
//! read interface the assembler needs.

use std::collections::HashMap;

use serde_json::{Map, Value};

/// Read access to a user's claims.
pub trait ClaimsSource: Send + Sync {
    /// The named claims for `uid`, skipping ones the user doesn't have.
    fn claims_for(&self, uid: &str, names: &[String]) -> Map<String, Value>;

    /// Every claim known for `uid`.
    fn all_claims(&self, uid: &str) -> Map<String, Value>;
}

/// Static claims table, keyed by uid.
#[derive(Default)]
pub struct StaticClaims {
    users: HashMap<String, Map<String, Value>>,
}

impl StaticClaims {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, uid: &str, claims: Map<String, Value>) {
        self.users.insert(uid.to_string(), claims);
    }
}

impl ClaimsSource for StaticClaims {
    fn claims_for(&self, uid: &str, names: &[String]) -> Map<String, Value> {
        let mut out = Map::new();
        if let Some(claims) = self.users.get(uid) {
            for name in names {
                if let Some(value) = claims.get(name) {
                    out.insert(name.clone(), value.clone());
                }
            }
        }
        out
    }

    fn all_claims(&self, uid: &str) -> Map<String, Value> {
        self.users.get(uid).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> StaticClaims {
        let mut s = StaticClaims::new();
        let mut claims = Map::new();
        claims.insert("name".to_string(), json!("Diana Krall"));
        claims.insert("email".to_string(), json!("diana@example.org"));
        s.insert("diana", claims);
        s
    }

    #[test]
    fn claims_for_filters_to_requested_names() {
        let s = source();
        let got = s.claims_for("diana", &["email".to_string(), "phone".to_string()]);
        assert_eq!(got.len(), 1);
        assert_eq!(got["email"], json!("diana@example.org"));
    }

    #[test]
    fn unknown_uid_yields_nothing() {
        let s = source();
        assert!(s.claims_for("peter", &["email".to_string()]).is_empty());
        assert!(s.all_claims("peter").is_empty());
    }
}
