//! Upload grant negotiation.
//!
//! Opens an exclusive TLS connection to the negotiation host and drives the
//! stanza handshake until the server issues a pre-signed upload/download
//! URL pair. Each negotiation owns its transport and session identity; a
//! failed attempt is never resumed, callers start over with a fresh
//! connection and session id.

pub mod connect;
pub mod engine;
mod error;
pub mod session;

pub use connect::TlsOptions;
pub use engine::negotiate;
pub use error::NegotiateError;
pub use session::Session;
