//! Protocol constants.
//!
//! The server uses short opaque strings as XML namespaces; they are matched
//! literally, never resolved against real URIs.

/// Default namespace for client stanzas (`iq`, `ed`, error conditions).
pub const NS_CLIENT: &str = "jc";

/// Namespace of the stream envelope and the `features` stanza.
pub const NS_STREAM: &str = "x1";

/// Namespace of the SASL capability child (`es`) and the `ok` reply.
pub const NS_SASL: &str = "x2";

/// Namespace of the resource bind capability child (`b1`).
pub const NS_BIND: &str = "x4";

/// Namespace of the push-enable stanza (`en`).
pub const NS_PUSH: &str = "x7";

/// Namespace of the authentication stanza (`ah`).
pub const NS_AUTH: &str = "ah:ns";

/// Namespace of the pre-signed upload URL query.
pub const NS_UPLOAD: &str = "todus:purl";

/// Negotiation endpoint.
pub const NEGOTIATION_HOST: &str = "im.todus.cu";
pub const NEGOTIATION_PORT: u16 = 1756;

/// Stream protocol version sent in the opening declaration.
pub const STREAM_VERSION: &str = "1.0";

/// The only SASL mechanism the server accepts.
pub const SASL_MECHANISM: &str = "PLAIN";

/// Maximum push interval (seconds) requested by the enable stanza.
pub const PUSH_MAX_INTERVAL: u32 = 300;
