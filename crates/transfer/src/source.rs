use std::future::Future;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use partflow_protocol::Part;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::TransferError;

/// Owned, sendable future. Dropping it cancels the operation.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Produces the bytes of a part.
///
/// The returned future must own everything it needs: the engine keeps it
/// in flight independently of `self`.
pub trait PartSource: Send + Sync {
    fn get_data(&self, part: Part) -> BoxFuture<Result<Bytes, TransferError>>;
}

/// One upload attempt for a part.
#[derive(Debug, Clone)]
pub struct PartPayload {
    pub part: Part,
    pub data: Bytes,
    /// Number of earlier failed attempts for this part.
    pub retry_counter: u32,
}

/// Result of a single upload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Success,
    /// Transient failure. The part is retried no sooner than `min_retry`.
    RetryableError { min_retry: Duration },
    NonRetryableError,
}

/// Sends one part to the server.
///
/// An `Err` from the returned future is treated like
/// [`UploadOutcome::NonRetryableError`].
pub trait PartUploader: Send + Sync {
    fn try_upload(&self, payload: PartPayload) -> BoxFuture<Result<UploadOutcome, TransferError>>;
}

// ---------------------------------------------------------------------------
// BytesSource
// ---------------------------------------------------------------------------

/// Parts sliced from an in-memory buffer.
#[derive(Debug, Clone)]
pub struct BytesSource {
    data: Bytes,
}

impl BytesSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn slice(&self, part: Part) -> Result<Bytes, TransferError> {
        if part.end_byte > self.len() || part.is_empty() {
            return Err(TransferError::Fetch {
                part: part.number,
                reason: format!(
                    "bytes {}..{} outside buffer of {} bytes",
                    part.start_byte,
                    part.end_byte,
                    self.len()
                ),
            });
        }
        Ok(self
            .data
            .slice(part.start_byte as usize..part.end_byte as usize))
    }
}

impl PartSource for BytesSource {
    fn get_data(&self, part: Part) -> BoxFuture<Result<Bytes, TransferError>> {
        let result = self.slice(part);
        Box::pin(std::future::ready(result))
    }
}

// ---------------------------------------------------------------------------
// FileSource
// ---------------------------------------------------------------------------

/// Parts read from a file on disk, one open + seek + read per part.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

async fn read_part(path: PathBuf, part: Part) -> Result<Bytes, TransferError> {
    let mut file = tokio::fs::File::open(&path).await?;
    file.seek(SeekFrom::Start(part.start_byte)).await?;
    let mut buf = vec![0u8; part.len() as usize];
    file.read_exact(&mut buf).await.map_err(|e| TransferError::Fetch {
        part: part.number,
        reason: e.to_string(),
    })?;
    Ok(Bytes::from(buf))
}

impl PartSource for FileSource {
    fn get_data(&self, part: Part) -> BoxFuture<Result<Bytes, TransferError>> {
        Box::pin(read_part(self.path.clone(), part))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn part(number: u32, start_byte: u64, end_byte: u64) -> Part {
        Part {
            number,
            start_byte,
            end_byte,
        }
    }

    #[tokio::test]
    async fn bytes_source_slices() {
        let source = BytesSource::new(&b"0123456789"[..]);
        let data = source.get_data(part(2, 4, 8)).await.unwrap();
        assert_eq!(&data[..], b"4567");
    }

    #[tokio::test]
    async fn bytes_source_rejects_out_of_range() {
        let source = BytesSource::new(vec![0u8; 4]);
        let err = source.get_data(part(1, 2, 10)).await.unwrap_err();
        assert!(matches!(err, TransferError::Fetch { part: 1, .. }));
    }

    #[tokio::test]
    async fn file_source_reads_exact_range() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"AABBCCDDEE").unwrap();

        let source = FileSource::new(file.path());
        let data = source.get_data(part(3, 4, 6)).await.unwrap();
        assert_eq!(&data[..], b"CC");
        let data = source.get_data(part(5, 8, 10)).await.unwrap();
        assert_eq!(&data[..], b"EE");
    }

    #[tokio::test]
    async fn file_source_short_read_is_fetch_error() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"short").unwrap();

        let source = FileSource::new(file.path());
        let err = source.get_data(part(1, 0, 100)).await.unwrap_err();
        assert!(matches!(err, TransferError::Fetch { part: 1, .. }));
    }

    #[tokio::test]
    async fn file_source_missing_file() {
        let source = FileSource::new("/definitely/not/here.bin");
        let err = source.get_data(part(1, 0, 1)).await.unwrap_err();
        assert!(matches!(err, TransferError::Io(_)));
    }
}
