//! Wire types shared by the upload engine, the job tracker and the
//! upload orchestrator.

pub mod constants;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use messages::{
    AuthorizeData, ClientMessage, EventBatch, EventIndicator, JobEvent, ServerMessage, SpawnedJob,
};
pub use types::{Indicator, JobRef, Part, PartEntry, PartRange, Progress, UploadInfo};
