//! Live tracking of server-side processing jobs.
//!
//! A job is observed over its own live connection. Jobs may spawn child
//! jobs, which are tracked recursively until every job in the tree has
//! reached a final state. Progress is written into a [`JobSink`], usually
//! a [`JobBoard`].

mod board;
mod breaker;
mod channel;
mod tracker;
mod ws;

pub use board::{Job, JobBoard, JobSink};
pub use breaker::FailureBreaker;
pub use channel::{ChannelFuture, JobChannel, JobConnector};
pub use tracker::{JobProgressTracker, NamedJob, TrackSummary};
pub use ws::{WsChannel, WsConnector};

use tokio_tungstenite::tungstenite;

/// Errors from job tracking.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed")]
    Closed,

    #[error("authorization rejected: {0}")]
    AuthRejected(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("event batch failed")]
    BatchFailed,

    #[error("too many connection failures while tracking job {0}")]
    TooManyFailures(String),

    #[error("cancelled")]
    Cancelled,
}
