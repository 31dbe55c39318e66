use std::time::Duration;

use tokio::time::Instant;

/// Failures further apart than this start a new window.
pub const FAILURE_WINDOW: Duration = Duration::from_secs(15);

/// Two failures closer than this are fatal.
pub const MIN_FAILURE_GAP: Duration = Duration::from_secs(1);

/// Failures tolerated within one window.
pub const MAX_RECENT_FAILURES: u32 = 5;

/// Decides when a job's live connection has failed too often to keep
/// reconnecting.
#[derive(Debug, Clone, Default)]
pub struct FailureBreaker {
    last_failure: Option<Instant>,
    recent_failures: u32,
}

impl FailureBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure at `now`. Returns `true` if the breaker tripped.
    pub fn record_failure(&mut self, now: Instant) -> bool {
        let gap = self.last_failure.map(|last| now.saturating_duration_since(last));
        self.last_failure = Some(now);

        match gap {
            Some(gap) if gap > FAILURE_WINDOW => self.recent_failures = 0,
            _ => self.recent_failures += 1,
        }

        self.recent_failures > MAX_RECENT_FAILURES || gap.is_some_and(|g| g < MIN_FAILURE_GAP)
    }

    /// Failures counted in the current window.
    pub fn recent_failures(&self) -> u32 {
        self.recent_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_failure_does_not_trip() {
        let mut breaker = FailureBreaker::new();
        assert!(!breaker.record_failure(Instant::now()));
        assert_eq!(breaker.recent_failures(), 1);
    }

    #[test]
    fn rapid_failures_trip() {
        let mut breaker = FailureBreaker::new();
        let start = Instant::now();
        assert!(!breaker.record_failure(start));
        assert!(breaker.record_failure(start + Duration::from_millis(500)));
    }

    #[test]
    fn six_spaced_failures_within_window_trip() {
        let mut breaker = FailureBreaker::new();
        let start = Instant::now();
        for i in 0..5 {
            assert!(
                !breaker.record_failure(start + Duration::from_secs(2 * i)),
                "failure {i} tripped early"
            );
        }
        assert!(breaker.record_failure(start + Duration::from_secs(10)));
    }

    #[test]
    fn quiet_period_resets_window() {
        let mut breaker = FailureBreaker::new();
        let mut at = Instant::now();
        for _ in 0..5 {
            at += Duration::from_secs(2);
            assert!(!breaker.record_failure(at));
        }
        at += Duration::from_secs(16);
        assert!(!breaker.record_failure(at));
        assert_eq!(breaker.recent_failures(), 0);

        for _ in 0..5 {
            at += Duration::from_secs(2);
            assert!(!breaker.record_failure(at));
        }
        at += Duration::from_secs(2);
        assert!(breaker.record_failure(at));
    }
}
