//! Negotiation error taxonomy.

/// Errors produced while obtaining an upload grant.
///
/// All variants are terminal for the attempt: the transport is closed and
/// the decoder released before the error surfaces. Nothing at this layer
/// retries.
#[derive(Debug, thiserror::Error)]
pub enum NegotiateError {
    /// Socket or TLS level failure.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The TLS client configuration could not be built.
    #[error("TLS setup error: {0}")]
    Tls(String),

    /// Dialing the negotiation host took too long.
    #[error("connect timed out")]
    ConnectTimeout,

    /// The server rejected the credentials.
    #[error("credentials rejected")]
    Authentication,

    /// The handshake reached a state the protocol does not allow.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// Server-signaled connection timeout.
    #[error("server reported a connection timeout")]
    ConnectionTimeout,

    /// The transport ended before a grant was issued.
    #[error("stream ended before a grant was issued")]
    EndOfStream,

    /// The owning task was cancelled.
    #[error("cancelled")]
    Cancelled,
}
