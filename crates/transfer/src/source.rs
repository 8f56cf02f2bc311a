//! Re-creatable payload sources.

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::io::AsyncRead;

/// Boxed reader over one attempt's payload bytes.
pub type SourceReader = Box<dyn AsyncRead + Send + Unpin>;

/// A byte source the upload engine can open once per attempt.
///
/// Retrying a failed upload re-sends the whole payload, so the engine
/// calls [`open`](Self::open) again for every attempt instead of resuming
/// a partially consumed reader. Implementations must yield the full
/// `len()` bytes from a fresh reader on every call; a single-use stream
/// cannot back an `UploadSource`.
pub trait UploadSource: Send + Sync {
    /// Total number of bytes each reader will yield.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Opens a fresh reader over the full payload.
    fn open(&self) -> BoxFuture<'_, io::Result<SourceReader>>;
}

/// Uploads a file from disk; every attempt re-opens the file.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    len: u64,
}

impl FileSource {
    /// Captures the file's current size; the upload grant is only valid
    /// for exactly this many bytes.
    pub async fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = tokio::fs::metadata(&path).await?.len();
        Ok(Self { path, len })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl UploadSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn open(&self) -> BoxFuture<'_, io::Result<SourceReader>> {
        Box::pin(async move {
            let file = tokio::fs::File::open(&self.path).await?;
            Ok(Box::new(file) as SourceReader)
        })
    }
}

/// Uploads an in-memory payload.
#[derive(Debug, Clone)]
pub struct BytesSource {
    data: Bytes,
}

impl BytesSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl UploadSource for BytesSource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn open(&self) -> BoxFuture<'_, io::Result<SourceReader>> {
        let data = self.data.clone();
        Box::pin(async move { Ok(Box::new(std::io::Cursor::new(data)) as SourceReader) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn bytes_source_reopens_from_start() {
        let source = BytesSource::new(b"payload".to_vec());
        assert_eq!(source.len(), 7);

        for _ in 0..2 {
            let mut reader = source.open().await.unwrap();
            let mut out = Vec::new();
            reader.read_to_end(&mut out).await.unwrap();
            assert_eq!(out, b"payload");
        }
    }

    #[tokio::test]
    async fn empty_bytes_source() {
        let source = BytesSource::new(Vec::new());
        assert_eq!(source.len(), 0);
        assert!(source.is_empty());
    }

    #[tokio::test]
    async fn file_source_captures_size_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        tokio::fs::write(&path, b"0123456789").await.unwrap();

        let source = FileSource::new(&path).await.unwrap();
        assert_eq!(source.len(), 10);

        for _ in 0..2 {
            let mut reader = source.open().await.unwrap();
            let mut out = Vec::new();
            reader.read_to_end(&mut out).await.unwrap();
            assert_eq!(out, b"0123456789");
        }
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileSource::new(dir.path().join("nope.bin")).await;
        assert!(result.is_err());
    }
}
