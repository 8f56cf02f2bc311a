//! Chunked payload upload with progress reporting and bounded retry.
//!
//! Consumes the grant produced by the negotiation crate: streams the
//! payload to the pre-signed upload URL via HTTP PUT and hands back the
//! share (download) URL on success.

mod chunked;
mod source;
mod upload;

pub use chunked::{DEFAULT_CHUNK_SIZE, ProgressHandler};
pub use source::{BytesSource, FileSource, SourceReader, UploadSource};
pub use upload::{RetryCallback, UploadOptions, Uploader};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Request-level failure (connect, timeout, body stream).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The upload endpoint answered with a non-success status.
    #[error("upload rejected with status {status}: {body}")]
    Status { status: u16, body: String },

    /// The payload source could not be opened or read.
    #[error("source error: {0}")]
    Source(#[from] std::io::Error),
}
