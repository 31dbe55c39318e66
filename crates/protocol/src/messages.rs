use serde::{Deserialize, Serialize};

use crate::constants::{EVENT_FAILED, EVENT_SPAWNED, EVENT_SUCCEEDED};
use crate::types::{Indicator, JobRef, Progress};

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

/// Messages the client sends on the live job channel.
///
/// Exactly one `authorize` message is sent per connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Authorize { data: AuthorizeData },
}

impl ClientMessage {
    /// Builds the authorization message for a job.
    pub fn authorize(job: &JobRef) -> Self {
        ClientMessage::Authorize {
            data: AuthorizeData {
                job_uid: job.uid.clone(),
                jwt: job.jwt.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizeData {
    pub job_uid: String,
    pub jwt: String,
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// Messages the server sends on the live job channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthResponse {
        success: bool,
    },
    EventBatch {
        success: bool,
        #[serde(default)]
        data: Option<EventBatch>,
    },
}

/// An ordered batch of job events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBatch {
    pub events: Vec<JobEvent>,
}

/// Indicator as sent by the server, which adds a `final` marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventIndicator {
    Spinner,
    Bar { at: u64, of: u64 },
    Final,
}

/// A job started by another job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnedJob {
    pub uid: String,
    pub jwt: String,
    pub name: String,
}

impl SpawnedJob {
    pub fn job_ref(&self) -> JobRef {
        JobRef {
            uid: self.uid.clone(),
            jwt: self.jwt.clone(),
        }
    }
}

/// A single event reported for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub indicator: Option<EventIndicator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawned: Option<SpawnedJob>,
}

impl JobEvent {
    /// Whether this event ends the job.
    pub fn is_final(&self) -> bool {
        self.kind == EVENT_SUCCEEDED
            || self.kind == EVENT_FAILED
            || matches!(self.indicator, Some(EventIndicator::Final))
    }

    /// Whether this (final) event reports success.
    pub fn succeeded(&self) -> bool {
        self.kind == EVENT_SUCCEEDED
    }

    /// The child job this event announces, if any.
    pub fn spawned_job(&self) -> Option<&SpawnedJob> {
        if self.kind == EVENT_SPAWNED {
            self.spawned.as_ref()
        } else {
            None
        }
    }

    /// Progress to display for this event. A `final` indicator is not shown.
    pub fn display_progress(&self) -> Progress {
        let indicator = match self.indicator {
            Some(EventIndicator::Spinner) => Some(Indicator::Spinner),
            Some(EventIndicator::Bar { at, of }) => Some(Indicator::Bar { at, of }),
            Some(EventIndicator::Final) | None => None,
        };
        Progress::new(self.message.clone(), indicator)
    }
}
