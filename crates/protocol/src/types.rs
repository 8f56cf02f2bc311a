//! Shared negotiation result types.

/// Pre-signed upload/download URL pair granted by a successful negotiation.
///
/// Exactly one grant is produced per negotiation; it is immutable and only
/// valid for a payload of exactly `file_size` bytes (the size is part of
/// the upload request the server signed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadGrant {
    /// Pre-signed PUT target for the payload bytes.
    pub upload_url: String,
    /// Share URL handed to the caller once the upload succeeds.
    pub download_url: String,
    /// Payload size the grant was issued for.
    pub file_size: u64,
}
