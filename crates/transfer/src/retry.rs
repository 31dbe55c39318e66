use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

/// Slot counts for the two in-flight stages of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Concurrency {
    /// Maximum number of parts whose data is being fetched (or held while
    /// waiting for an upload slot).
    pub acquire_data: usize,
    /// Maximum number of parts being uploaded.
    pub upload: usize,
}

impl Default for Concurrency {
    fn default() -> Self {
        Self {
            acquire_data: 3,
            upload: 5,
        }
    }
}

impl Concurrency {
    /// Both counts raised to at least one.
    pub fn clamped(self) -> Self {
        Self {
            acquire_data: self.acquire_data.max(1),
            upload: self.upload.max(1),
        }
    }
}

type BackoffFn = dyn Fn(u32) -> Duration + Send + Sync;

/// How failed uploads are retried.
#[derive(Clone)]
pub struct RetryPolicy {
    backoff: Arc<BackoffFn>,
    /// Maximum number of retries per part. A part is attempted at most
    /// `max + 1` times.
    pub max: u32,
}

impl RetryPolicy {
    /// A policy with a custom backoff. `backoff` receives the part's retry
    /// counter (0 for the first retry).
    pub fn new(max: u32, backoff: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        Self {
            backoff: Arc::new(backoff),
            max,
        }
    }

    /// `base * 2^attempt` plus a uniform jitter in `[0, max_jitter)`.
    pub fn exponential(base: Duration, max_jitter: Duration, max: u32) -> Self {
        Self::new(max, move |attempt| {
            let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
            let jitter_ms = max_jitter.as_millis() as u64;
            let jitter = if jitter_ms == 0 {
                Duration::ZERO
            } else {
                Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
            };
            base.saturating_mul(factor) + jitter
        })
    }

    /// Never retries.
    pub fn none() -> Self {
        Self::new(0, |_| Duration::ZERO)
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        (self.backoff)(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(1), Duration::from_secs(1), 5)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max", &self.max)
            .finish_non_exhaustive()
    }
}
