//! Parsed authorization request and its typed vocabulary.
//!
//! The HTTP adapter parses the raw query string into an
//! `AuthorizationRequest` before the flow controller ever sees it; anything
//! structurally invalid (unknown response_type token, bad claims JSON) is
//! rejected at that boundary.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One of the response type tokens defined by OAuth2/OIDC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResponseType {
    #[serde(rename = "code")]
    Code,
    #[serde(rename = "token")]
    Token,
    #[serde(rename = "id_token")]
    IdToken,
    #[serde(rename = "none")]
    None,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Code => "code",
            ResponseType::Token => "token",
            ResponseType::IdToken => "id_token",
            ResponseType::None => "none",
        }
    }
}

impl FromStr for ResponseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(ResponseType::Code),
            "token" => Ok(ResponseType::Token),
            "id_token" => Ok(ResponseType::IdToken),
            "none" => Ok(ResponseType::None),
            other => Err(format!("unknown response_type: {other}")),
        }
    }
}

/// `prompt` directives we act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Prompt {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "login")]
    Login,
    #[serde(rename = "consent")]
    Consent,
    #[serde(rename = "select_account")]
    SelectAccount,
}

impl FromStr for Prompt {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Prompt::None),
            "login" => Ok(Prompt::Login),
            "consent" => Ok(Prompt::Consent),
            "select_account" => Ok(Prompt::SelectAccount),
            other => Err(format!("unknown prompt: {other}")),
        }
    }
}

/// `response_mode` values we know how to encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseMode {
    #[serde(rename = "query")]
    Query,
    #[serde(rename = "fragment")]
    Fragment,
    #[serde(rename = "form_post")]
    FormPost,
}

impl FromStr for ResponseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "query" => Ok(ResponseMode::Query),
            "fragment" => Ok(ResponseMode::Fragment),
            "form_post" => Ok(ResponseMode::FormPost),
            other => Err(format!("unknown response_mode: {other}")),
        }
    }
}

/// Constraint on an individual requested claim (OIDC core §5.5.1).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub essential: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
}

/// The `claims` request parameter: claims-location -> claim name -> constraint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimsRequest {
    #[serde(default)]
    pub id_token: BTreeMap<String, Option<ClaimSpec>>,
    #[serde(default)]
    pub userinfo: BTreeMap<String, Option<ClaimSpec>>,
}

/// An admitted authorization request. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub client_id: String,
    /// Ordered as given by the client; resolve through `response_type_set`.
    pub response_type: Vec<ResponseType>,
    pub redirect_uri: String,
    #[serde(default)]
    pub scope: BTreeSet<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub claims: Option<ClaimsRequest>,
    #[serde(default)]
    pub prompt: BTreeSet<Prompt>,
    /// Top-level `max_age` parameter.
    #[serde(default)]
    pub max_age: Option<u64>,
    /// `max_age` carried inside a request object, which takes precedence.
    #[serde(default)]
    pub request_object_max_age: Option<u64>,
    #[serde(default)]
    pub acr_values: Vec<String>,
    #[serde(default)]
    pub ui_locales: Vec<String>,
    #[serde(default)]
    pub response_mode: Option<ResponseMode>,
    /// Explicit re-auth confirmation: forces max_age to 0.
    #[serde(default)]
    pub upm_answer: bool,
    /// The subject the requester wants the user to be.
    #[serde(default)]
    pub req_user: Option<String>,
}

impl AuthorizationRequest {
    /// The requested response types with duplicates removed.
    pub fn response_type_set(&self) -> BTreeSet<ResponseType> {
        self.response_type.iter().copied().collect()
    }

    /// Effective max_age: request-object field wins over the top-level one,
    /// absence means 0 ("no freshness constraint").
    pub fn effective_max_age(&self) -> u64 {
        self.request_object_max_age.or(self.max_age).unwrap_or(0)
    }

    /// ACR values requested through the `claims` parameter
    /// (`claims.id_token.acr`): a `value` entry yields a one-element list,
    /// a `values` entry the whole list, anything else nothing.
    pub fn acr_claims(&self) -> Option<Vec<String>> {
        let spec = self.claims.as_ref()?.id_token.get("acr")?.as_ref()?;
        if let Some(Value::String(v)) = &spec.value {
            return Some(vec![v.clone()]);
        }
        if let Some(values) = &spec.values {
            let acrs: Vec<String> = values
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            if !acrs.is_empty() {
                return Some(acrs);
            }
        }
        None
    }

    /// Claim names requested for the given location in the `claims` parameter.
    pub fn requested_claim_names(&self, location: ClaimsLocation) -> Vec<String> {
        let Some(claims) = &self.claims else {
            return Vec::new();
        };
        let map = match location {
            ClaimsLocation::IdToken => &claims.id_token,
            ClaimsLocation::Userinfo => &claims.userinfo,
        };
        map.keys().cloned().collect()
    }

    /// The request re-encoded as a query string, echoed to authenticators so
    /// the flow can be resumed with the exact same request.
    pub fn to_urlencoded(&self) -> String {
        let mut ser = url::form_urlencoded::Serializer::new(String::new());
        ser.append_pair("client_id", &self.client_id);
        let rt = self
            .response_type
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        ser.append_pair("response_type", &rt);
        ser.append_pair("redirect_uri", &self.redirect_uri);
        if !self.scope.is_empty() {
            let scope = self.scope.iter().cloned().collect::<Vec<_>>().join(" ");
            ser.append_pair("scope", &scope);
        }
        if let Some(state) = &self.state {
            ser.append_pair("state", state);
        }
        if let Some(nonce) = &self.nonce {
            ser.append_pair("nonce", nonce);
        }
        if !self.acr_values.is_empty() {
            ser.append_pair("acr_values", &self.acr_values.join(" "));
        }
        ser.finish()
    }
}

/// Where requested claims are to be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimsLocation {
    IdToken,
    Userinfo,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal well-formed request used across the authz test modules.
    pub(crate) fn request(client_id: &str, response_type: &[ResponseType]) -> AuthorizationRequest {
        AuthorizationRequest {
            client_id: client_id.to_string(),
            response_type: response_type.to_vec(),
            redirect_uri: "https://rp.example/cb".to_string(),
            scope: BTreeSet::new(),
            state: None,
            nonce: None,
            claims: None,
            prompt: BTreeSet::new(),
            max_age: None,
            request_object_max_age: None,
            acr_values: Vec::new(),
            ui_locales: Vec::new(),
            response_mode: None,
            upm_answer: false,
            req_user: None,
        }
    }

    #[test]
    fn response_type_set_dedups() {
        let req = request("c1", &[ResponseType::Code, ResponseType::Code]);
        assert_eq!(req.response_type_set().len(), 1);
    }

    #[test]
    fn effective_max_age_prefers_request_object() {
        let mut req = request("c1", &[ResponseType::Code]);
        assert_eq!(req.effective_max_age(), 0);
        req.max_age = Some(300);
        assert_eq!(req.effective_max_age(), 300);
        req.request_object_max_age = Some(60);
        assert_eq!(req.effective_max_age(), 60);
    }

    #[test]
    fn acr_claims_single_value() {
        let mut req = request("c1", &[ResponseType::Code]);
        let mut id_token = BTreeMap::new();
        id_token.insert(
            "acr".to_string(),
            Some(ClaimSpec {
                value: Some(Value::String("loa-2".to_string())),
                ..Default::default()
            }),
        );
        req.claims = Some(ClaimsRequest {
            id_token,
            userinfo: BTreeMap::new(),
        });
        assert_eq!(req.acr_claims(), Some(vec!["loa-2".to_string()]));
    }

    #[test]
    fn acr_claims_values_list() {
        let mut req = request("c1", &[ResponseType::Code]);
        let mut id_token = BTreeMap::new();
        id_token.insert(
            "acr".to_string(),
            Some(ClaimSpec {
                values: Some(vec![
                    Value::String("loa-1".into()),
                    Value::String("loa-2".into()),
                ]),
                ..Default::default()
            }),
        );
        req.claims = Some(ClaimsRequest {
            id_token,
            userinfo: BTreeMap::new(),
        });
        assert_eq!(
            req.acr_claims(),
            Some(vec!["loa-1".to_string(), "loa-2".to_string()])
        );
    }

    #[test]
    fn acr_claims_absent() {
        let req = request("c1", &[ResponseType::Code]);
        assert_eq!(req.acr_claims(), None);
    }

    #[test]
    fn urlencoded_echo_round_trips_core_fields() {
        let mut req = request("c1", &[ResponseType::Code, ResponseType::IdToken]);
        req.state = Some("s1".to_string());
        let encoded = req.to_urlencoded();
        assert!(encoded.contains("client_id=c1"));
        assert!(encoded.contains("response_type=code+id_token"));
        assert!(encoded.contains("state=s1"));
    }
}
