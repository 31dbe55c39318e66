//! Uploader error types.

use std::time::Duration;

use partflow_jobs::JobError;
use partflow_transfer::TransferError;

/// Errors reported by an [`UploadHost`](crate::UploadHost).
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("server busy, retry in {min_retry:?}: {reason}")]
    Retryable { min_retry: Duration, reason: String },

    #[error("request rejected: {0}")]
    NonRetryable(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HostError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Retryable { .. } => true,
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            Self::NonRetryable(_) | Self::Json(_) => false,
        }
    }
}

/// Errors that end an upload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Client(String),

    #[error("host error: {0}")]
    Host(#[from] HostError),

    #[error("upload failed: {0}")]
    Engine(String),

    #[error("processing job failed")]
    ProcessingFailed,

    #[error("poll timeout")]
    PollTimeout,

    #[error("polling failed: {0}")]
    PollFailed(String),

    #[error("job tracking failed: {0}")]
    Jobs(JobError),
}

impl From<TransferError> for UploadError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::Cancelled => Self::Cancelled,
            e => Self::Client(e.to_string()),
        }
    }
}

impl From<JobError> for UploadError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::Cancelled => Self::Cancelled,
            e => Self::Jobs(e),
        }
    }
}

/// Coarse classification of an [`UploadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Cancelled,
    Client,
    RetryableServer,
    NonRetryableServer,
    Timeout,
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Client(_) => ErrorKind::Client,
            Self::Host(e) if e.is_retryable() => ErrorKind::RetryableServer,
            Self::Host(HostError::Json(_)) => ErrorKind::Client,
            Self::Host(_) => ErrorKind::NonRetryableServer,
            Self::Engine(_) | Self::ProcessingFailed => ErrorKind::NonRetryableServer,
            Self::PollTimeout => ErrorKind::Timeout,
            Self::PollFailed(_) => ErrorKind::RetryableServer,
            Self::Jobs(_) => ErrorKind::RetryableServer,
        }
    }
}
