//! Uploader configuration.
//!
//! Read from a JSON file. Every field is optional and falls back to the
//! defaults below.

use std::path::Path;
use std::time::Duration;

use partflow_transfer::{Concurrency, RetryPolicy};
use serde::{Deserialize, Serialize};

/// Errors loading an [`UploaderConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    pub api_base_url: String,
    /// Endpoint that authorizes new uploads.
    pub start_path: String,
    /// Endpoint searched for processed files by content hash.
    pub search_path: String,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub polling: PollingConfig,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080".into(),
            start_path: "/api/1/uploads/start".into(),
            search_path: "/api/1/uploads/search".into(),
            concurrency: ConcurrencyConfig::default(),
            retry: RetryConfig::default(),
            polling: PollingConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub upload: usize,
    pub acquire_data: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            upload: 5,
            acquire_data: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_backoff_ms: 1000,
            max_jitter_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_secs: u64,
    /// Deadline when processing cannot be followed live.
    pub timeout_secs: u64,
    /// Deadline after the live processing jobs reported success.
    pub after_processing_timeout_secs: u64,
    pub max_consecutive_errors: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            timeout_secs: 600,
            after_processing_timeout_secs: 30,
            max_consecutive_errors: 5,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn after_processing_timeout(&self) -> Duration {
        Duration::from_secs(self.after_processing_timeout_secs)
    }
}

impl UploaderConfig {
    /// Loads the config at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Engine slot counts for an upload of `end_part_number` parts.
    pub fn engine_concurrency(&self, end_part_number: u32) -> Concurrency {
        Concurrency {
            acquire_data: self.concurrency.acquire_data,
            upload: self.concurrency.upload.min(end_part_number as usize),
        }
        .clamped()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            Duration::from_millis(self.retry.base_backoff_ms),
            Duration::from_millis(self.retry.max_jitter_ms),
            self.retry.max_retries,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = UploaderConfig::load(&dir.path().join("partflow.json")).unwrap();
        assert_eq!(config, UploaderConfig::default());
        assert_eq!(config.polling.interval(), Duration::from_secs(5));
        assert_eq!(config.polling.timeout(), Duration::from_secs(600));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partflow.json");
        std::fs::write(
            &path,
            r#"{"api_base_url": "https://api.example.com", "concurrency": {"upload": 2}}"#,
        )
        .unwrap();

        let config = UploaderConfig::load(&path).unwrap();
        assert_eq!(config.api_base_url, "https://api.example.com");
        assert_eq!(config.concurrency.upload, 2);
        assert_eq!(config.concurrency.acquire_data, 3);
        assert_eq!(config.retry, RetryConfig::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partflow.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            UploaderConfig::load(&path),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn upload_slots_capped_by_part_count() {
        let config = UploaderConfig::default();
        assert_eq!(config.engine_concurrency(2).upload, 2);
        assert_eq!(config.engine_concurrency(40).upload, 5);
        assert_eq!(config.engine_concurrency(0).upload, 1);
        assert_eq!(config.retry_policy().max, 5);
    }
}
