//! Provider-capability negotiation.
//!
//! Builds the supported-capability superset once at startup, merges the
//! configured overrides into it and appends the endpoint URLs. The result is
//! the provider-metadata document served at the discovery path; it never
//! changes afterwards.

use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::error;

/// Startup capability conflict. Fatal: the server must not start with
/// metadata it cannot honor.
#[derive(Debug, Error, PartialEq)]
pub enum CapabilityError {
    /// Every offending `key:value` pair, in configuration order.
    #[error("server doesn't support the following features: {}", .0.join(", "))]
    Unsupported(Vec<String>),
}

const RESPONSE_TYPES_SUPPORTED: [&str; 8] = [
    "code",
    "token",
    "id_token",
    "code token",
    "code id_token",
    "id_token token",
    "code token id_token",
    "none",
];

/// Signing algorithms the JWT layer can produce or verify.
const SIGNING_ALGS: [&str; 14] = [
    "HS256", "HS384", "HS512", "RS256", "RS384", "RS512", "ES256", "ES384", "EdDSA", "PS256",
    "PS384", "PS512", "none", "ES512",
];

const SCOPE_TO_CLAIMS: [(&str, &[&str]); 5] = [
    ("openid", &["sub"]),
    (
        "profile",
        &[
            "name",
            "given_name",
            "family_name",
            "middle_name",
            "nickname",
            "preferred_username",
            "profile",
            "picture",
            "website",
            "gender",
            "birthdate",
            "zoneinfo",
            "locale",
            "updated_at",
        ],
    ),
    ("email", &["email", "email_verified"]),
    ("address", &["address"]),
    ("phone", &["phone_number", "phone_number_verified"]),
];

/// Family priority for algorithm lists: RSA, EC (EdDSA counts as EC), HMAC,
/// RSA-PSS, then "none" last. Ties break alphabetically.
fn alg_rank(alg: &str) -> u8 {
    match alg.get(0..2) {
        Some("RS") => 0,
        Some("ES") | Some("Ed") => 1,
        Some("HS") => 2,
        Some("PS") => 3,
        _ => 4,
    }
}

fn sorted_sign_algs() -> Vec<String> {
    let mut algs: Vec<String> = SIGNING_ALGS.iter().map(|a| a.to_string()).collect();
    algs.sort_by(|a, b| alg_rank(a).cmp(&alg_rank(b)).then_with(|| a.cmp(b)));
    algs
}

/// The capability superset this implementation supports, before any
/// configured narrowing.
fn package_capabilities(issuer: &str, acr_values: &[String]) -> Map<String, Value> {
    let mut info = Map::new();
    info.insert("issuer".to_string(), json!(issuer));
    info.insert("version".to_string(), json!("3.0"));
    info.insert(
        "response_types_supported".to_string(),
        json!(RESPONSE_TYPES_SUPPORTED),
    );
    info.insert(
        "token_endpoint_auth_methods_supported".to_string(),
        json!([
            "client_secret_post",
            "client_secret_basic",
            "client_secret_jwt",
            "private_key_jwt"
        ]),
    );
    info.insert(
        "response_modes_supported".to_string(),
        json!(["query", "fragment", "form_post"]),
    );
    info.insert(
        "subject_types_supported".to_string(),
        json!(["public", "pairwise"]),
    );
    info.insert(
        "grant_types_supported".to_string(),
        json!([
            "authorization_code",
            "implicit",
            "urn:ietf:params:oauth:grant-type:jwt-bearer",
            "refresh_token"
        ]),
    );
    info.insert(
        "claim_types_supported".to_string(),
        json!(["normal", "aggregated", "distributed"]),
    );
    info.insert("claims_parameter_supported".to_string(), json!(true));
    info.insert("request_parameter_supported".to_string(), json!(true));
    info.insert("request_uri_parameter_supported".to_string(), json!(true));
    info.insert("require_request_uri_registration".to_string(), json!(false));

    let scopes: Vec<&str> = SCOPE_TO_CLAIMS.iter().map(|(s, _)| *s).collect();
    info.insert("scopes_supported".to_string(), json!(scopes));
    let mut claims: Vec<&str> = SCOPE_TO_CLAIMS.iter().flat_map(|(_, c)| *c).copied().collect();
    claims.sort_unstable();
    claims.dedup();
    info.insert("claims_supported".to_string(), json!(claims));

    let sign_algs = sorted_sign_algs();
    for typ in ["userinfo", "id_token", "request_object"] {
        info.insert(
            format!("{typ}_signing_alg_values_supported"),
            json!(&sign_algs),
        );
    }
    // "none" is not allowed for token-endpoint authentication.
    let auth_algs: Vec<&String> = sign_algs.iter().filter(|a| *a != "none").collect();
    info.insert(
        "token_endpoint_auth_signing_alg_values_supported".to_string(),
        json!(auth_algs),
    );

    if !acr_values.is_empty() {
        info.insert("acr_values_supported".to_string(), json!(acr_values));
    }

    info
}

/// Merge one configured override into the supported superset.
///
/// Returns the offending `key:value` strings, empty when the override is
/// acceptable. Rules per value kind: booleans may only be narrowed, strings
/// must match exactly, lists are checked for containment in the superset.
fn merge_override(info: &mut Map<String, Value>, key: &str, val: &Value) -> Vec<String> {
    let Some(allowed) = info.get(key).cloned() else {
        // Keys we have no opinion about are advertised verbatim.
        info.insert(key.to_string(), val.clone());
        return Vec::new();
    };

    match allowed {
        Value::Bool(supported) => {
            if !supported && val == &Value::Bool(true) {
                return vec![format!("{key}:true")];
            }
            info.insert(key.to_string(), val.clone());
            Vec::new()
        }
        Value::String(supported) => {
            if val.as_str() == Some(supported.as_str()) {
                Vec::new()
            } else {
                vec![format!("{key}:{val}")]
            }
        }
        Value::Array(supported) => {
            // A string override is shorthand for a one-element list.
            let wanted: Vec<Value> = match val {
                Value::String(s) => vec![Value::String(s.clone())],
                Value::Array(items) => items.clone(),
                other => return vec![format!("{key}:{other}")],
            };
            let outside: Vec<String> = wanted
                .iter()
                .filter(|v| !supported.contains(v))
                .map(|v| match v {
                    Value::String(s) => format!("{key}:{s}"),
                    other => format!("{key}:{other}"),
                })
                .collect();
            if outside.is_empty() {
                info.insert(key.to_string(), Value::Array(wanted));
            }
            outside
        }
        _ => vec![format!("{key}:{val}")],
    }
}

/// Build the provider metadata: supported superset, narrowed by the
/// configured `overrides`, with endpoint URLs joined onto `base_url`.
///
/// Any override outside the supported superset fails startup, naming every
/// unsupported item.
pub fn negotiate(
    issuer: &str,
    base_url: &str,
    endpoints: &[(&str, &str)],
    acr_values: &[String],
    overrides: &Map<String, Value>,
) -> Result<Map<String, Value>, CapabilityError> {
    let mut info = package_capabilities(issuer, acr_values);

    let mut not_supported = Vec::new();
    for (key, val) in overrides {
        not_supported.extend(merge_override(&mut info, key, val));
    }
    if !not_supported.is_empty() {
        error!(
            unsupported = %not_supported.join(", "),
            "configured capabilities exceed what this server supports"
        );
        return Err(CapabilityError::Unsupported(not_supported));
    }

    let base = base_url.trim_end_matches('/');
    for (name, path) in endpoints {
        info.insert(
            format!("{name}_endpoint"),
            json!(format!("{base}/{}", path.trim_start_matches('/'))),
        );
    }

    Ok(info)
}
