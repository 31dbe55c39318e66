use partflow_protocol::{Part, PartRange};
use tokio::time::Instant;

/// Lifecycle of an upload engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Running,
    /// Every part was uploaded.
    Success,
    /// The engine was cancelled or hit a fatal failure. No part will be
    /// uploaded anymore.
    Error,
}

impl EngineState {
    pub fn is_terminal(self) -> bool {
        self != EngineState::Running
    }
}

/// Statistics about retried uploads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryStats {
    /// Bytes scheduled for another attempt, summed over every retry.
    pub bytes: u64,
    /// Number of retries scheduled.
    pub parts: u64,
    /// Highest retry counter reached by any part.
    pub highest_counter: u32,
}

/// A part with an upload attempt in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlightPart {
    pub part: Part,
    pub retry_counter: u32,
}

/// A part waiting for its retry delay to elapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitingPart {
    pub part: Part,
    pub retry_counter: u32,
    pub retry_at: Instant,
}

/// Snapshot of every bucket of an upload engine.
///
/// Each part number appears in exactly one bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadProgress {
    pub remaining: Vec<PartRange>,
    /// Parts being fetched, or fetched and waiting for an upload slot.
    pub acquiring_data: Vec<Part>,
    pub uploading: Vec<InFlightPart>,
    /// Sorted by `retry_at`.
    pub waiting_to_retry: Vec<WaitingPart>,
    pub finished: Vec<PartRange>,
    pub errored: Vec<PartRange>,
    pub retried: RetryStats,
}

impl UploadProgress {
    /// Bytes uploaded successfully.
    pub fn finished_bytes(&self) -> u64 {
        self.finished.iter().map(PartRange::total_bytes).sum()
    }

    pub fn finished_parts(&self) -> u64 {
        count_parts(&self.finished)
    }

    pub fn errored_parts(&self) -> u64 {
        count_parts(&self.errored)
    }

    /// Number of parts in any bucket.
    pub fn total_parts(&self) -> u64 {
        count_parts(&self.remaining)
            + self.acquiring_data.len() as u64
            + self.uploading.len() as u64
            + self.waiting_to_retry.len() as u64
            + count_parts(&self.finished)
            + count_parts(&self.errored)
    }

    /// Every part number held by the snapshot, in bucket order.
    pub fn part_numbers(&self) -> Vec<u32> {
        let ranged = |ranges: &[PartRange]| -> Vec<u32> {
            ranges.iter().flat_map(|r| r.number..r.end_number()).collect()
        };
        let mut numbers = ranged(&self.remaining);
        numbers.extend(self.acquiring_data.iter().map(|p| p.number));
        numbers.extend(self.uploading.iter().map(|p| p.part.number));
        numbers.extend(self.waiting_to_retry.iter().map(|p| p.part.number));
        numbers.extend(ranged(&self.finished));
        numbers.extend(ranged(&self.errored));
        numbers
    }
}

fn count_parts(ranges: &[PartRange]) -> u64 {
    ranges.iter().map(|r| u64::from(r.number_of_parts)).sum()
}
