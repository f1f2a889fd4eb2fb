//! Store configuration
//!
//! Loaded from JSON (every field optional) or built in code with the `with_*`
//! setters.
//!
//! ```json
//! {
//!   "database_path": "/tmp/run-42/capture.sqlite",
//!   "queue_capacity": 500,
//!   "insert_batch_size": 20
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, Result};
use crate::policy::CapturePolicy;

/// Default capacity of the ingestion queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 500;

/// Default number of rows inserted per transaction
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 20;

/// Default page size of a lazy query cursor
pub const DEFAULT_FETCH_SIZE: usize = 10;

/// Configuration for a [`MessageStore`](crate::store::MessageStore)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file, recreated when the store opens
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Capacity of the bounded ingestion queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Rows per transaction during a batch commit
    #[serde(default = "default_insert_batch_size")]
    pub insert_batch_size: usize,

    /// Worker pool size; derived from the CPU count when absent
    #[serde(default)]
    pub worker_count: Option<usize>,

    /// Worker poll timeout on an empty queue
    #[serde(default = "default_poll_interval_micros")]
    pub poll_interval_micros: u64,

    /// Rows fetched per page by a query cursor
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,

    /// SQLite busy timeout
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Upper bound on verification re-queries after a commit
    #[serde(default = "default_verify_max_attempts")]
    pub verify_max_attempts: usize,

    #[serde(default)]
    pub policy: CapturePolicy,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("capture.sqlite")
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_insert_batch_size() -> usize {
    DEFAULT_INSERT_BATCH_SIZE
}

fn default_poll_interval_micros() -> u64 {
    1_000
}

fn default_fetch_size() -> usize {
    DEFAULT_FETCH_SIZE
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_verify_max_attempts() -> usize {
    100_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            queue_capacity: default_queue_capacity(),
            insert_batch_size: default_insert_batch_size(),
            worker_count: None,
            poll_interval_micros: default_poll_interval_micros(),
            fetch_size: default_fetch_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
            verify_max_attempts: default_verify_max_attempts(),
            policy: CapturePolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Default configuration writing to the given database file
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            ..Self::default()
        }
    }

    /// Load and validate a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: StoreConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the rows per transaction
    pub fn with_insert_batch_size(mut self, size: usize) -> Self {
        self.insert_batch_size = size;
        self
    }

    /// Pin the worker pool size
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    /// Set the worker poll timeout
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_micros = interval.as_micros().max(1) as u64;
        self
    }

    /// Set the cursor page size
    pub fn with_fetch_size(mut self, size: usize) -> Self {
        self.fetch_size = size;
        self
    }

    /// Replace the protocol policy
    pub fn with_policy(mut self, policy: CapturePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Reject configurations the store cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity must be greater than zero"));
        }
        if self.insert_batch_size == 0 {
            return Err(invalid("insert_batch_size must be greater than zero"));
        }
        if self.fetch_size == 0 {
            return Err(invalid("fetch_size must be greater than zero"));
        }
        if self.worker_count == Some(0) {
            return Err(invalid("worker_count must be greater than zero"));
        }
        if self.verify_max_attempts == 0 {
            return Err(invalid("verify_max_attempts must be greater than zero"));
        }
        if self.database_path.as_os_str().is_empty() {
            return Err(invalid("database_path must not be empty"));
        }
        Ok(())
    }

    /// Effective worker pool size, `max(1, cpus / 2)` unless pinned
    pub fn effective_worker_count(&self) -> usize {
        self.worker_count
            .unwrap_or_else(|| (num_cpus::get() / 2).max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_micros)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn invalid(reason: &str) -> CaptureError {
    CaptureError::InvalidConfig {
        reason: reason.to_string(),
    }
}
