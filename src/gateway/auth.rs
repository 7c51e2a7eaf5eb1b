//! Static bearer-token check.
//!
//! The configured token is kept only as a SHA-256 digest; requests are
//! compared digest-to-digest in constant time.

use crate::observability::AuthFailure;
use axum::http::{header, HeaderMap};
use sha2::{Digest, Sha256};

/// Upper bound on how much of an offending token is ever reported.
pub const TOKEN_HINT_MAX_CHARS: usize = 6;

/// A failed check, with what operators are allowed to see of the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRejection {
    pub reason: AuthFailure,
    pub token_hint: Option<String>,
}

/// Hex-encoded SHA-256 of a token.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Constant-time byte comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Bounded prefix of `token` for logs.
///
/// At most [`TOKEN_HINT_MAX_CHARS`] characters and never more than half the
/// token, so the full value cannot be reconstructed from a log line.
pub fn token_hint(token: &str) -> String {
    let total = token.chars().count();
    let shown = TOKEN_HINT_MAX_CHARS.min(total / 2);
    let prefix: String = token.chars().take(shown).collect();
    format!("{prefix}…")
}

/// Extract bearer token from Authorization header.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AuthRejection> {
    let value = headers.get(header::AUTHORIZATION).ok_or(AuthRejection {
        reason: AuthFailure::MissingHeader,
        token_hint: None,
    })?;

    let malformed = AuthRejection {
        reason: AuthFailure::MalformedHeader,
        token_hint: None,
    };
    let value = value.to_str().map_err(|_| malformed.clone())?;
    let token = value.strip_prefix("Bearer ").ok_or_else(|| malformed.clone())?;
    if token.trim().is_empty() {
        return Err(malformed);
    }
    Ok(token)
}

/// Check the request's bearer token against the configured digest.
pub fn check_bearer(headers: &HeaderMap, expected_hash: &str) -> Result<(), AuthRejection> {
    let token = extract_bearer_token(headers)?;
    let provided_hash = hash_token(token);
    if constant_time_eq(provided_hash.as_bytes(), expected_hash.as_bytes()) {
        Ok(())
    } else {
        Err(AuthRejection {
            reason: AuthFailure::InvalidToken,
            token_hint: Some(token_hint(token)),
        })
    }
}
