//! Endpoint paths and event names used on the wire.

/// Path of the live job progress WebSocket endpoint.
pub const LIVE_JOBS_PATH: &str = "/api/2/jobs/live";

/// Path prefix for uploading a single part: `{prefix}/{upload_uid}/{part_number}`.
pub const FILE_UPLOADS_PATH: &str = "/api/1/file_uploads";

/// Event type emitted when a job finished successfully.
pub const EVENT_SUCCEEDED: &str = "succeeded";

/// Event type emitted when a job finished unsuccessfully.
pub const EVENT_FAILED: &str = "failed";

/// Event type emitted when a job started a child job.
pub const EVENT_SPAWNED: &str = "spawned";
