use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use partflow_jobs::JobConnector;
use partflow_protocol::UploadInfo;
use partflow_transfer::PartUploader;
use serde_json::{Map, Value};

use crate::HostError;

/// Future returned by [`UploadHost`] methods.
pub type HostFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The server-side record of a fully processed file.
pub type ProcessedItem = Value;

/// Server operations the orchestrator depends on.
pub trait UploadHost: Send + Sync {
    /// Requests authorization to upload `file_size` bytes. `extra` is
    /// merged into the request body.
    fn start_upload<'a>(
        &'a self,
        file_size: u64,
        extra: &'a Map<String, Value>,
    ) -> HostFuture<'a, Result<UploadInfo, HostError>>;

    /// Looks up the processed record for a file by content hash.
    /// `None` means it is not available yet.
    fn poll_processed<'a>(
        &'a self,
        sha512: &'a str,
    ) -> HostFuture<'a, Result<Option<ProcessedItem>, HostError>>;

    /// Uploader for the parts of an authorized upload.
    fn part_uploader(&self, info: &UploadInfo) -> Arc<dyn PartUploader>;

    /// Connector for the live processing job channel.
    fn job_connector(&self) -> Arc<dyn JobConnector>;
}
