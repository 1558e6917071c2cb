//! Redirect-URI validation against a client's registered set.
//!
//! Pure validation, no network round-trips. The rules, per OIDC core:
//! - the URI MUST NOT contain a fragment,
//! - the base MUST exactly match one registered base,
//! - query components must match the registered ones in both directions
//!   (every registered key/value appears in the request, and every request
//!   key/value appears in the registered slot).
//!
//! Callers are responsible for logging redacted request data on failure.

use std::collections::BTreeMap;

use thiserror::Error;
use url::Url;

/// Registered query constraint: name -> ordered set of values.
pub type RegisteredQuery = BTreeMap<String, Vec<String>>;

#[derive(Debug, Error, PartialEq)]
pub enum RedirectUriError {
    #[error("redirect_uri contains a fragment")]
    Fragment,

    #[error("redirect_uri is not a valid absolute uri")]
    Malformed,

    #[error("redirect_uri does not match any registered uri")]
    NoMatch,
}

/// Validate `redirect_uri` against the client's registered `(base, query)`
/// pairs. First registered entry that matches wins; entries are tried in
/// declaration order.
pub fn verify_redirect_uri(
    redirect_uri: &str,
    registered: &[(String, Option<RegisteredQuery>)],
) -> Result<(), RedirectUriError> {
    let parsed = Url::parse(redirect_uri).map_err(|_| RedirectUriError::Malformed)?;
    if parsed.fragment().is_some() {
        return Err(RedirectUriError::Fragment);
    }

    let (base, query) = split_query(redirect_uri);
    let request_query = parse_query(query);

    for (reg_base, reg_query) in registered {
        if base != *reg_base {
            continue;
        }
        if candidate_matches(&request_query, reg_query.as_ref()) {
            return Ok(());
        }
        // A base hit with a query mismatch does not poison other candidates.
    }

    Err(RedirectUriError::NoMatch)
}

fn split_query(uri: &str) -> (&str, Option<&str>) {
    match uri.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (uri, None),
    }
}

fn parse_query(query: Option<&str>) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    if let Some(q) = query {
        for (k, v) in url::form_urlencoded::parse(q.as_bytes()) {
            map.entry(k.into_owned()).or_default().push(v.into_owned());
        }
    }
    map
}

/// Two-way containment between the request's query multimap and the
/// registered one.
fn candidate_matches(
    request_query: &BTreeMap<String, Vec<String>>,
    registered: Option<&RegisteredQuery>,
) -> bool {
    // Every registered key/value must appear in the request.
    if let Some(reg) = registered {
        for (key, vals) in reg {
            let Some(req_vals) = request_query.get(key) else {
                return false;
            };
            if !vals.iter().all(|v| req_vals.contains(v)) {
                return false;
            }
        }
    }

    // And vice versa: every request key/value must be registered.
    if !request_query.is_empty() {
        let Some(reg) = registered else {
            return false;
        };
        for (key, vals) in request_query {
            let Some(reg_vals) = reg.get(key) else {
                return false;
            };
            if !vals.iter().all(|v| reg_vals.contains(v)) {
                return false;
            }
        }
    }

    true
}
