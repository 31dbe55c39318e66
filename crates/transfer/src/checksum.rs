use std::path::Path;

use sha2::{Digest, Sha512};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::{HASH_BUFFER_SIZE, TransferError};

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Streams `reader` through SHA-512 in [`HASH_BUFFER_SIZE`] reads.
///
/// `on_progress` receives the running total of hashed bytes after every
/// read. The token is checked between reads.
pub async fn sha512_reader<R, F>(
    mut reader: R,
    mut on_progress: F,
    cancel: &CancellationToken,
) -> Result<String, TransferError>
where
    R: AsyncRead + Unpin,
    F: FnMut(u64),
{
    let mut hasher = Sha512::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    let mut hashed = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        hashed += n as u64;
        on_progress(hashed);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Computes SHA-512 of an entire file.
pub async fn sha512_file<F>(
    path: &Path,
    on_progress: F,
    cancel: &CancellationToken,
) -> Result<String, TransferError>
where
    F: FnMut(u64),
{
    let file = tokio::fs::File::open(path).await?;
    sha512_reader(file, on_progress, cancel).await
}
