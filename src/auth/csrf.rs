//! Signed double-submit CSRF tokens for the browser upload form.
//!
//! A token has the form `{nonce}.{expiry}.{signature}` where `expiry` is a Unix
//! timestamp and `signature` is the hex HMAC-SHA256 of `{nonce}.{expiry}`
//! under the server secret. The index page sets the token as a cookie and
//! embeds it in the form; a submission is accepted when both copies are equal
//! and the token verifies.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Form field carrying the token.
pub const CSRF_FIELD: &str = "csrf_token";

/// Header carrying the token for script clients.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Cookie holding the server-issued copy.
pub const CSRF_COOKIE: &str = "csrf_token";

/// Default token lifetime.
pub const DEFAULT_CSRF_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Reasons a CSRF token is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CsrfError {
    #[error("CSRF token is malformed")]
    Malformed,

    #[error("CSRF token has expired")]
    Expired,

    #[error("CSRF token signature is invalid")]
    InvalidSignature,

    #[error("CSRF token does not match cookie")]
    Mismatch,
}

/// Issues and verifies CSRF tokens.
#[derive(Clone)]
pub struct CsrfGuard {
    secret: Vec<u8>,
    ttl: Duration,
}

impl CsrfGuard {
    /// Create a guard signing with `secret` and the default lifetime.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            ttl: DEFAULT_CSRF_TTL,
        }
    }

    /// Override the token lifetime.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a fresh token valid for the configured lifetime.
    pub fn issue(&self) -> String {
        let expiry = unix_now().saturating_add(self.ttl.as_secs());
        self.issue_with_expiry(expiry)
    }

    /// Issue a token with an explicit expiry timestamp.
    pub fn issue_with_expiry(&self, expiry: u64) -> String {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let payload = format!("{}.{}", nonce, expiry);
        let signature = self.sign(&payload);
        format!("{}.{}", payload, signature)
    }

    /// Verify signature and expiry of a single token.
    pub fn verify(&self, token: &str) -> Result<(), CsrfError> {
        self.verify_at(token, unix_now())
    }

    /// [`verify`](Self::verify) against an explicit clock reading.
    pub fn verify_at(&self, token: &str, now: u64) -> Result<(), CsrfError> {
        let (payload, signature) = token.rsplit_once('.').ok_or(CsrfError::Malformed)?;
        let (nonce, expiry) = payload.split_once('.').ok_or(CsrfError::Malformed)?;
        if nonce.is_empty() || signature.is_empty() {
            return Err(CsrfError::Malformed);
        }
        let expiry: u64 = expiry.parse().map_err(|_| CsrfError::Malformed)?;

        let expected = self.sign(payload);
        if !bool::from(expected.as_bytes().ct_eq(signature.as_bytes())) {
            return Err(CsrfError::InvalidSignature);
        }

        if now > expiry {
            return Err(CsrfError::Expired);
        }
        Ok(())
    }

    /// Check a submitted token against the cookie copy.
    pub fn check(&self, submitted: &str, cookie: &str) -> Result<(), CsrfError> {
        if !bool::from(submitted.as_bytes().ct_eq(cookie.as_bytes())) {
            return Err(CsrfError::Mismatch);
        }
        self.verify(submitted)
    }

    /// Convenience wrapper around [`check`](Self::check).
    pub fn matches(&self, submitted: Option<&str>, cookie: Option<&str>) -> bool {
        match (submitted, cookie) {
            (Some(submitted), Some(cookie)) => self.check(submitted, cookie).is_ok(),
            _ => false,
        }
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Extract a named cookie value from a `Cookie` header.
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then_some(value)
    })
}
