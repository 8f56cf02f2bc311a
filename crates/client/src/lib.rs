//! High-level ToDus file transfer client.
//!
//! Composes the lower crates into the convenience flow the service's apps
//! use: REST auth for a bearer token, then per-upload grant negotiation
//! and the chunked PUT, returning the share URL.
//!
//! Every upload call owns its transport and session id; nothing is shared
//! or reused between concurrent calls, so a `Client` can run uploads in
//! parallel from independent tasks.

use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use todus_auth::{AuthClient, AuthError, token};
use todus_negotiate::{NegotiateError, Session, TlsOptions, connect, negotiate};
use todus_protocol::constants::{NEGOTIATION_HOST, NEGOTIATION_PORT};
use todus_transfer::{
    BytesSource, DEFAULT_CHUNK_SIZE, FileSource, TransferError, UploadOptions, UploadSource,
    Uploader,
};

pub use todus_transfer::ProgressHandler;

/// Errors surfaced by the facade.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("negotiation error: {0}")]
    Negotiate(#[from] NegotiateError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),
}

/// Client configuration; the defaults match the official client build the
/// service currently accepts.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub version: String,
    pub version_code: String,
    /// Base HTTP timeout (the upload timeout scales up from this).
    pub timeout: Duration,
    pub chunk_size: usize,
    pub tls: TlsOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            version: "0.38.34".into(),
            version_code: "21805".into(),
            timeout: Duration::from_secs(300),
            chunk_size: DEFAULT_CHUNK_SIZE,
            tls: TlsOptions::default(),
        }
    }
}

/// High-level client for the out-of-band file transfer flow.
pub struct Client {
    config: ClientConfig,
    auth: AuthClient,
    uploader: Uploader,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let auth = AuthClient::new(&config.version, &config.version_code, config.timeout)?;
        let uploader = Uploader::new(
            &config.version,
            Some(config.chunk_size),
            Some(config.timeout),
        )?;
        Ok(Self {
            config,
            auth,
            uploader,
        })
    }

    /// Asks the service to send a verification SMS code.
    pub async fn request_code(&self, phone: &str) -> Result<(), ClientError> {
        Ok(self.auth.request_code(phone).await?)
    }

    /// Validates the SMS code; returns the account password.
    pub async fn validate_code(&self, phone: &str, code: &str) -> Result<String, ClientError> {
        Ok(self.auth.validate_code(phone, code).await?)
    }

    /// Logs in; returns the bearer token used for uploads.
    pub async fn login(&self, phone: &str, password: &str) -> Result<String, ClientError> {
        Ok(self.auth.login(phone, password).await?)
    }

    /// Uploads a payload and returns its share URL.
    ///
    /// Negotiates a fresh grant over its own TLS connection, then streams
    /// the payload to the granted URL. The source must yield exactly
    /// `source.len()` bytes per attempt.
    pub async fn upload<S>(
        &self,
        token: &str,
        source: &S,
        options: &UploadOptions,
    ) -> Result<String, ClientError>
    where
        S: UploadSource + ?Sized,
    {
        let identity = token::parse(token)?;
        let session = Session::new(identity.phone, identity.auth_blob);
        let cancel = CancellationToken::new();

        let stream = connect::open(
            NEGOTIATION_HOST,
            NEGOTIATION_PORT,
            &self.config.tls,
            &cancel,
        )
        .await?;
        let grant = negotiate(stream, &session, source.len(), &cancel).await?;
        info!(size = source.len(), "upload grant obtained");

        Ok(self.uploader.upload(token, &grant, source, options).await?)
    }

    /// Uploads a file from disk.
    pub async fn upload_file(
        &self,
        token: &str,
        path: impl AsRef<Path>,
        options: &UploadOptions,
    ) -> Result<String, ClientError> {
        let source = FileSource::new(path).await.map_err(TransferError::from)?;
        self.upload(token, &source, options).await
    }

    /// Uploads an in-memory payload.
    pub async fn upload_bytes(
        &self,
        token: &str,
        data: Vec<u8>,
        options: &UploadOptions,
    ) -> Result<String, ClientError> {
        let source = BytesSource::new(data);
        self.upload(token, &source, options).await
    }
}
