//! Upload engine: PUT the payload to the granted URL.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH};
use tracing::{debug, warn};

use todus_protocol::UploadGrant;

use crate::TransferError;
use crate::chunked::{DEFAULT_CHUNK_SIZE, ProgressHandler, progress_body};
use crate::source::UploadSource;

/// Default request timeout floor.
const DEFAULT_BASE_TIMEOUT: Duration = Duration::from_secs(300);

/// Seconds granted per MiB of payload before the request times out.
const TIMEOUT_SECS_PER_MIB: u64 = 20;

/// Callback invoked before each re-attempt.
pub type RetryCallback = Arc<dyn Fn() + Send + Sync>;

/// Per-upload knobs. The default is a single attempt with no callbacks.
#[derive(Clone, Default)]
pub struct UploadOptions {
    /// Total attempt budget; `0` is treated as `1`.
    pub retry_limit: u32,
    pub on_retry: Option<RetryCallback>,
    pub on_progress: Option<ProgressHandler>,
}

/// HTTP upload engine for granted payloads.
pub struct Uploader {
    http: reqwest::Client,
    chunk_size: usize,
    base_timeout: Duration,
}

impl Uploader {
    /// Creates an uploader identifying itself with the given client
    /// version. `chunk_size` and `base_timeout` fall back to 64 KiB and
    /// 300 s.
    pub fn new(
        version: &str,
        chunk_size: Option<usize>,
        base_timeout: Option<Duration>,
    ) -> Result<Self, TransferError> {
        let http = reqwest::Client::builder()
            .user_agent(format!("ToDus {version} HTTP-Upload"))
            .build()?;
        Ok(Self {
            http,
            chunk_size: chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            base_timeout: base_timeout.unwrap_or(DEFAULT_BASE_TIMEOUT),
        })
    }

    /// Streams the payload to `grant.upload_url` and returns the share URL.
    ///
    /// On failure the attempt budget is decremented; when it runs out the
    /// last attempt's error propagates unchanged. Each attempt re-opens
    /// `source` from the start (see [`UploadSource`]).
    pub async fn upload<S>(
        &self,
        token: &str,
        grant: &UploadGrant,
        source: &S,
        options: &UploadOptions,
    ) -> Result<String, TransferError>
    where
        S: UploadSource + ?Sized,
    {
        let total = source.len();
        let timeout = self.put_timeout(total);
        let mut remaining = options.retry_limit.max(1);

        loop {
            match self.attempt(token, grant, source, total, timeout, options).await {
                Ok(()) => {
                    debug!(total, url = %grant.download_url, "upload complete");
                    return Ok(grant.download_url.clone());
                }
                Err(err) => {
                    remaining -= 1;
                    if remaining == 0 {
                        return Err(err);
                    }
                    warn!(error = %err, remaining, "upload attempt failed, retrying");
                    if let Some(on_retry) = &options.on_retry {
                        let on_retry = Arc::clone(on_retry);
                        let _ = tokio::task::spawn_blocking(move || on_retry()).await;
                    }
                }
            }
        }
    }

    async fn attempt<S>(
        &self,
        token: &str,
        grant: &UploadGrant,
        source: &S,
        total: u64,
        timeout: Duration,
        options: &UploadOptions,
    ) -> Result<(), TransferError>
    where
        S: UploadSource + ?Sized,
    {
        let reader = source.open().await?;
        let body = progress_body(reader, total, self.chunk_size, options.on_progress.clone());

        let response = self
            .http
            .put(&grant.upload_url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(CONTENT_LENGTH, total)
            .timeout(timeout)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransferError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// Request timeout scaled to the payload: 20 s per MiB, floored at the
    /// configured base.
    fn put_timeout(&self, total: u64) -> Duration {
        let scaled = Duration::from_secs((total / (1024 * 1024)) * TIMEOUT_SECS_PER_MIB);
        scaled.max(self.base_timeout)
    }
}
