use serde::{Deserialize, Serialize};

/// Configuration for the local SQLite record store.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteStoreConfig {
    /// Connection string (e.g. "sqlite://data/queue.db" or "sqlite::memory:").
    pub database_url: String,
    /// Maximum number of pooled connections.
    pub max_connections: u32,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout_ms: u64,
}

impl SqliteStoreConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Self::default()
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:")
    }
}

impl Default for SqliteStoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://courier.db".to_string(),
            max_connections: 4,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Tuning for the queue manager: concurrency, batching, retry budget and
/// backoff shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound on simultaneously in-flight uploads.
    pub max_concurrent_uploads: usize,
    /// Number of items claimed per reservation.
    pub batch_size: usize,
    /// Failed attempts after which an item becomes terminally `failed`.
    pub max_retries: u32,
    /// Pause between claim cycles, in milliseconds.
    pub inter_batch_delay_ms: u64,
    /// How often the recovery monitor polls reachability, in milliseconds.
    pub reachability_poll_interval_ms: u64,
    /// Delay for the first retry, doubled on every further attempt.
    pub backoff_base_ms: u64,
    /// Ceiling for the un-jittered backoff.
    pub backoff_max_ms: u64,
    /// No retry is scheduled sooner than this.
    pub backoff_floor_ms: u64,
    /// Uniform jitter applied around the base delay (0.1 = ±10%).
    pub backoff_jitter_ratio: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: 3,
            batch_size: 5,
            max_retries: 5,
            inter_batch_delay_ms: 500,
            reachability_poll_interval_ms: 5_000,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            backoff_floor_ms: 1_000,
            backoff_jitter_ratio: 0.1,
        }
    }
}

impl SyncConfig {
    pub fn with_max_concurrent_uploads(mut self, max: usize) -> Self {
        self.max_concurrent_uploads = max;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_inter_batch_delay(mut self, ms: u64) -> Self {
        self.inter_batch_delay_ms = ms;
        self
    }

    pub fn with_reachability_poll_interval(mut self, ms: u64) -> Self {
        self.reachability_poll_interval_ms = ms;
        self
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent_uploads == 0 {
            anyhow::bail!("max_concurrent_uploads must be at least 1");
        }
        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be at least 1");
        }
        if self.max_retries == 0 {
            anyhow::bail!("max_retries must be at least 1");
        }
        if self.reachability_poll_interval_ms == 0 {
            anyhow::bail!("reachability_poll_interval_ms must be non-zero");
        }
        if !(0.0..1.0).contains(&self.backoff_jitter_ratio) {
            anyhow::bail!(
                "backoff_jitter_ratio must be in [0, 1), got {}",
                self.backoff_jitter_ratio
            );
        }
        if self.backoff_max_ms < self.backoff_floor_ms {
            anyhow::bail!("backoff_max_ms must not be below backoff_floor_ms");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_constants() {
        let config = SyncConfig::default();
        assert_eq!(config.max_concurrent_uploads, 3);
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.inter_batch_delay_ms, 500);
        assert_eq!(config.reachability_poll_interval_ms, 5_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{ "batch_size": 10 }"#).unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        assert!(SyncConfig::default().with_batch_size(0).validate().is_err());
        assert!(SyncConfig::default()
            .with_max_concurrent_uploads(0)
            .validate()
            .is_err());
        assert!(SyncConfig::default().with_max_retries(0).validate().is_err());

        let config = SyncConfig {
            backoff_jitter_ratio: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_in_memory_detection() {
        assert!(SqliteStoreConfig::new("sqlite::memory:").is_in_memory());
        assert!(!SqliteStoreConfig::default().is_in_memory());
    }
}
