//! Drives a single file from local hashing through chunked upload to the
//! end of server-side processing.

pub mod config;
pub mod error;
pub mod host;
pub mod http;
pub mod orchestrator;
pub mod sink;

pub use config::{ConcurrencyConfig, ConfigError, PollingConfig, RetryConfig, UploaderConfig};
pub use error::{ErrorKind, HostError, UploadError};
pub use host::{HostFuture, ProcessedItem, UploadHost};
pub use http::{HttpHost, HttpPartUploader, classify_response};
pub use orchestrator::{UploadFile, UploadOrchestrator, UploadState};
pub use sink::{FnSink, ProgressSink};
