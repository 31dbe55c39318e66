//! Chunked upload engine.
//!
//! Splits a file into numbered byte-range parts ([`PartitionModel`]),
//! then drives every part through data acquisition and upload with two
//! independent concurrency caps, retrying transient failures with backoff
//! ([`UploadEngine`]).

mod checksum;
mod engine;
mod partition;
mod progress;
mod ranges;
mod retry;
mod source;

pub use checksum::{sha512_file, sha512_reader};
pub use engine::{UploadArgs, UploadEngine, UploadHandle};
pub use partition::PartitionModel;
pub use progress::{EngineState, InFlightPart, RetryStats, UploadProgress, WaitingPart};
pub use ranges::RangeList;
pub use retry::{Concurrency, RetryPolicy};
pub use source::{
    BoxFuture, BytesSource, FileSource, PartPayload, PartSource, PartUploader, UploadOutcome,
};

/// Size of the buffer used when streaming a file through the hasher.
pub const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("part {0} not found")]
    PartNotFound(u32),

    #[error("malformed parts: {0}")]
    MalformedParts(String),

    #[error("failed to acquire data for part {part}: {reason}")]
    Fetch { part: u32, reason: String },

    #[error("upload of part {part} failed: {reason}")]
    Upload { part: u32, reason: String },

    #[error("cancelled")]
    Cancelled,
}
