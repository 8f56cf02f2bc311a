//! Account authentication: bearer token decoding and the SMS-code REST
//! flow (reserve a number, validate the code, log in for a token).

pub mod rest;
pub mod token;

pub use rest::AuthClient;
pub use token::TokenIdentity;

/// Errors produced by the auth crate.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Request-level failure or non-success status from the auth service.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The bearer token is not in the expected dot-delimited format.
    #[error("invalid token: {0}")]
    InvalidToken(String),
}
