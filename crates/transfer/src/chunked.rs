//! Chunked request body with progress reporting.
//!
//! The payload reader is turned into a stream of fixed-size chunks; after
//! each chunk the progress handler observes `(sent, total)`. Within one
//! attempt the reported offset is monotonically non-decreasing, capped at
//! the announced total, and ends exactly at it.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::Stream;
use futures_util::future::BoxFuture;
use tokio::io::AsyncReadExt;

use crate::source::SourceReader;

/// Default upload chunk size: 64 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Progress observer invoked with `(bytes_sent, total_bytes)`.
///
/// Synchronous handlers may block (UI updates, disk logging), so they run
/// on the blocking worker pool instead of the request task. Async handlers
/// are awaited inline.
#[derive(Clone)]
pub enum ProgressHandler {
    Sync(Arc<dyn Fn(u64, u64) + Send + Sync>),
    Async(Arc<dyn Fn(u64, u64) -> BoxFuture<'static, ()> + Send + Sync>),
}

impl ProgressHandler {
    /// Wraps a synchronous callback.
    pub fn sync(f: impl Fn(u64, u64) + Send + Sync + 'static) -> Self {
        Self::Sync(Arc::new(f))
    }

    /// Wraps an async callback.
    pub fn future(f: impl Fn(u64, u64) -> BoxFuture<'static, ()> + Send + Sync + 'static) -> Self {
        Self::Async(Arc::new(f))
    }

    async fn report(&self, sent: u64, total: u64) {
        match self {
            Self::Sync(f) => {
                let f = Arc::clone(f);
                let _ = tokio::task::spawn_blocking(move || f(sent, total)).await;
            }
            Self::Async(f) => f(sent, total).await,
        }
    }
}

struct BodyState {
    reader: SourceReader,
    sent: u64,
    total: u64,
    chunk_size: usize,
    progress: Option<ProgressHandler>,
}

/// Turns an opened source reader into a chunk stream with progress side
/// effects.
pub(crate) fn chunk_stream(
    reader: SourceReader,
    total: u64,
    chunk_size: usize,
    progress: Option<ProgressHandler>,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    let state = BodyState {
        reader,
        sent: 0,
        total,
        chunk_size,
        progress,
    };
    futures_util::stream::try_unfold(state, |mut state| async move {
        let mut buf = vec![0u8; state.chunk_size.max(1)];
        let n = state.reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        state.sent += n as u64;
        if let Some(progress) = &state.progress {
            progress
                .report(state.sent.min(state.total), state.total)
                .await;
        }
        Ok(Some((Bytes::from(buf), state)))
    })
}

/// Builds the streaming PUT body for one upload attempt.
pub(crate) fn progress_body(
    reader: SourceReader,
    total: u64,
    chunk_size: usize,
    progress: Option<ProgressHandler>,
) -> reqwest::Body {
    reqwest::Body::wrap_stream(chunk_stream(reader, total, chunk_size, progress))
}
