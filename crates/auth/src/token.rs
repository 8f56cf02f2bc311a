//! Bearer token codec.
//!
//! The access token is a JWT-style dot-delimited string. Its payload
//! segment is a base64 JSON object whose `username` field is the account's
//! phone identifier. The negotiation handshake authenticates with a SASL
//! PLAIN blob derived from the same token.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use serde::Deserialize;

use crate::AuthError;

/// Identity material extracted from a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenIdentity {
    /// Phone identifier (the token's `username` claim).
    pub phone: String,
    /// Base64 SASL PLAIN payload: NUL, username, NUL, full token.
    pub auth_blob: String,
}

#[derive(Deserialize)]
struct Claims {
    username: String,
}

/// Decodes a bearer token into the phone identifier and auth blob.
pub fn parse(token: &str) -> Result<TokenIdentity, AuthError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| AuthError::InvalidToken("missing payload segment".into()))?;

    // JWT payloads use the URL-safe alphabet without padding, but the
    // service has emitted standard-alphabet tokens as well.
    let raw = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| STANDARD.decode(payload))
        .map_err(|e| AuthError::InvalidToken(format!("payload is not base64: {e}")))?;

    let claims: Claims = serde_json::from_slice(&raw)
        .map_err(|e| AuthError::InvalidToken(format!("payload is not a claims object: {e}")))?;

    let mut plain = Vec::with_capacity(2 + claims.username.len() + token.len());
    plain.push(0);
    plain.extend_from_slice(claims.username.as_bytes());
    plain.push(0);
    plain.extend_from_slice(token.as_bytes());

    Ok(TokenIdentity {
        auth_blob: STANDARD.encode(plain),
        phone: claims.username,
    })
}
