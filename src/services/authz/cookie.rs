//! Signed session-cookie codec.
//!
//! The cookie is a compact JWS (HS256 over the configured symmetric key)
//! carrying `{uid, iat}`. Tampering and staleness are surfaced as distinct
//! conditions so the flow can log them apart, even though both are
//! downgraded to "no identity".

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq)]
pub enum CookieError {
    /// Signature did not verify or the payload is garbage.
    #[error("cookie failed tamper check")]
    Tamper,

    /// Valid signature, but older than the allowed max_age.
    #[error("cookie authentication too old")]
    TooOld,

    #[error("could not seal cookie")]
    Seal,
}

#[derive(Debug, Serialize, Deserialize)]
struct CookieClaims {
    uid: String,
    iat: i64,
}

/// Seals and opens the session cookie. One instance per process, built from
/// the configured symmetric key.
#[derive(Clone)]
pub struct CookieCodec {
    cookie_name: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl CookieCodec {
    pub fn new(cookie_name: &str, symkey: &str) -> Self {
        Self {
            cookie_name: cookie_name.to_string(),
            encoding_key: EncodingKey::from_secret(symkey.as_bytes()),
            decoding_key: DecodingKey::from_secret(symkey.as_bytes()),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Produce the signed cookie value for an authenticated uid.
    pub fn seal(&self, uid: &str, now: DateTime<Utc>) -> Result<String, CookieError> {
        let claims = CookieClaims {
            uid: uid.to_string(),
            iat: now.timestamp(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(
            |e| {
                warn!(error = %e, "failed to seal session cookie");
                CookieError::Seal
            },
        )
    }

    /// Verify a cookie value and return `(uid, authentication timestamp)`.
    ///
    /// `max_age == 0` means any live cookie is accepted regardless of age.
    pub fn open(
        &self,
        raw: &str,
        max_age: u64,
        now: DateTime<Utc>,
    ) -> Result<(String, i64), CookieError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // The cookie carries iat only; age policy is ours, not the JWT layer's.
        validation.validate_exp = false;
        validation.required_spec_claims.remove("exp");

        let data = jsonwebtoken::decode::<CookieClaims>(raw, &self.decoding_key, &validation)
            .map_err(|_| CookieError::Tamper)?;

        if max_age > 0 {
            let age = now.timestamp() - data.claims.iat;
            if age < 0 || age as u64 > max_age {
                return Err(CookieError::TooOld);
            }
        }

        Ok((data.claims.uid, data.claims.iat))
    }

    /// Render a `Set-Cookie` header value for the sealed cookie.
    pub fn set_cookie_header(&self, sealed: &str) -> String {
        format!(
            "{}={}; HttpOnly; Secure; SameSite=Lax; Path=/",
            self.cookie_name, sealed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn codec() -> CookieCodec {
        CookieCodec::new("oidc_authz", "0123456789abcdef0123456789abcdef")
    }

    fn at(ts: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(ts, 0).unwrap()
    }

    #[test]
    fn seal_open_round_trip() {
        let c = codec();
        let sealed = c.seal("diana", at(1_700_000_000)).unwrap();
        let (uid, iat) = c.open(&sealed, 0, at(1_700_000_500)).unwrap();
        assert_eq!(uid, "diana");
        assert_eq!(iat, 1_700_000_000);
    }

    #[test]
    fn tampered_cookie_is_rejected() {
        let c = codec();
        let mut sealed = c.seal("diana", at(1_700_000_000)).unwrap();
        sealed.push('x');
        assert_eq!(c.open(&sealed, 0, at(1_700_000_100)), Err(CookieError::Tamper));
    }

    #[test]
    fn wrong_key_is_tamper() {
        let c = codec();
        let other = CookieCodec::new("oidc_authz", "ffffffffffffffffffffffffffffffff");
        let sealed = other.seal("diana", at(1_700_000_000)).unwrap();
        assert_eq!(c.open(&sealed, 0, at(1_700_000_100)), Err(CookieError::Tamper));
    }

    #[test]
    fn max_age_zero_accepts_any_age() {
        let c = codec();
        let sealed = c.seal("diana", at(1_600_000_000)).unwrap();
        assert!(c.open(&sealed, 0, at(1_700_000_000)).is_ok());
    }

    #[test]
    fn stale_cookie_is_too_old_not_tamper() {
        let c = codec();
        let sealed = c.seal("diana", at(1_700_000_000)).unwrap();
        assert_eq!(
            c.open(&sealed, 60, at(1_700_000_061)),
            Err(CookieError::TooOld)
        );
        assert!(c.open(&sealed, 60, at(1_700_000_059)).is_ok());
    }
}
