//! # Indexer Configuration Module
//!
//! Provides configuration management for the scrobble indexer.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct an
//! `IndexerConfig` holding the storage location, bulk query sizing and the
//! worker pool layout used by the task server. The builder enforces fail-fast
//! validation so a misconfigured worker pool never reaches the queue.
//!
//! ## Defaults
//!
//! | Setting             | Default                         |
//! |---------------------|---------------------------------|
//! | `chunk_size`        | 100 tuples per lookup query     |
//! | `workers`           | one `lastfm_worker`, 5 slots    |
//! | `job_timeout`       | 15 minutes                      |
//! | `poll_interval`     | 1000 ms                         |
//! | `max_attempts`      | 3                               |
//! | `results_expire_in` | 3600 seconds                    |
//!
//! ## Usage
//!
//! ```
//! use core_runtime::config::{IndexerConfig, WorkerConfig};
//! use std::time::Duration;
//!
//! let config = IndexerConfig::builder()
//!     .database_path("/var/lib/indexer/indexer.db")
//!     .chunk_size(250)
//!     .worker(WorkerConfig::new("lastfm_worker", 8))
//!     .job_timeout(Duration::from_secs(600))
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.chunk_size, 250);
//! ```

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Default number of key tuples per bulk lookup query.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Default name of the worker consuming user indexing jobs.
pub const DEFAULT_WORKER_NAME: &str = "lastfm_worker";

/// Default number of concurrent jobs per worker.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 5;

/// Upper bound on `chunk_size`; SQLite caps bound parameters per statement.
const MAX_CHUNK_SIZE: usize = 10_000;

/// Configuration for a single queue worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Worker name, used as the consumer tag in logs and job rows
    pub name: String,
    /// Maximum number of jobs this worker runs at the same time
    pub concurrency: usize,
}

impl WorkerConfig {
    /// Creates a worker configuration
    pub fn new(name: impl Into<String>, concurrency: usize) -> Self {
        Self {
            name: name.into(),
            concurrency,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_WORKER_NAME, DEFAULT_WORKER_CONCURRENCY)
    }
}

/// Configuration for the scrobble indexer.
///
/// Use [`IndexerConfigBuilder`] to construct instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerConfig {
    /// Path to the SQLite database holding entities, counts and the job queue
    pub database_path: PathBuf,

    /// Maximum number of key tuples per bulk lookup / insert statement
    pub chunk_size: usize,

    /// Workers launched by the task server
    pub workers: Vec<WorkerConfig>,

    /// Maximum time a single job may run before it is considered failed
    pub job_timeout: Duration,

    /// How long an idle worker waits before polling the queue again
    pub poll_interval: Duration,

    /// Number of deliveries a job gets before it is failed permanently
    pub max_attempts: u32,

    /// How long finished jobs are kept before cleanup removes them
    pub results_expire_in: Duration,
}

impl IndexerConfig {
    /// Creates a new builder for constructing an `IndexerConfig`.
    pub fn builder() -> IndexerConfigBuilder {
        IndexerConfigBuilder::default()
    }

    /// Total number of job slots across all workers.
    pub fn total_concurrency(&self) -> usize {
        self.workers.iter().map(|w| w.concurrency).sum()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Database path is not empty
    /// - Chunk size is within `1..=10_000`
    /// - At least one worker is configured, each with a unique name and
    ///   a non-zero concurrency
    /// - Timeouts and attempt limits are non-zero
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.chunk_size == 0 {
            return Err(Error::Config(
                "Chunk size must be greater than 0".to_string(),
            ));
        }

        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::Config(format!(
                "Chunk size exceeds maximum of {}",
                MAX_CHUNK_SIZE
            )));
        }

        if self.workers.is_empty() {
            return Err(Error::Config(
                "At least one worker must be configured".to_string(),
            ));
        }

        for (i, worker) in self.workers.iter().enumerate() {
            if worker.name.trim().is_empty() {
                return Err(Error::Config("Worker name cannot be empty".to_string()));
            }
            if worker.concurrency == 0 {
                return Err(Error::Config(format!(
                    "Worker '{}' must have a concurrency greater than 0",
                    worker.name
                )));
            }
            if self.workers[..i].iter().any(|w| w.name == worker.name) {
                return Err(Error::Config(format!(
                    "Duplicate worker name '{}'",
                    worker.name
                )));
            }
        }

        if self.job_timeout.is_zero() {
            return Err(Error::Config(
                "Job timeout must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(Error::Config(
                "Poll interval must be greater than 0".to_string(),
            ));
        }

        if self.max_attempts == 0 {
            return Err(Error::Config(
                "Max attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for constructing [`IndexerConfig`] instances.
///
/// Only the database path is required; every other setting falls back to the
/// defaults documented at the module level.
#[derive(Debug, Default)]
pub struct IndexerConfigBuilder {
    database_path: Option<PathBuf>,
    chunk_size: Option<usize>,
    workers: Vec<WorkerConfig>,
    job_timeout: Option<Duration>,
    poll_interval: Option<Duration>,
    max_attempts: Option<u32>,
    results_expire_in: Option<Duration>,
}

impl IndexerConfigBuilder {
    /// Sets the database path.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::IndexerConfig;
    ///
    /// let builder = IndexerConfig::builder()
    ///     .database_path("/path/to/indexer.db");
    /// ```
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the number of key tuples per bulk query.
    ///
    /// Default: 100
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    /// Adds a worker. When no worker is added the default `lastfm_worker`
    /// with 5 slots is used.
    pub fn worker(mut self, worker: WorkerConfig) -> Self {
        self.workers.push(worker);
        self
    }

    /// Sets the per-job timeout.
    ///
    /// Default: 15 minutes
    pub fn job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    /// Sets the idle polling interval.
    ///
    /// Default: 1000 ms
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Sets the maximum number of deliveries per job.
    ///
    /// Default: 3
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Sets how long finished jobs are retained.
    ///
    /// Default: 3600 seconds
    pub fn results_expire_in(mut self, expire_in: Duration) -> Self {
        self.results_expire_in = Some(expire_in);
        self
    }

    /// Builds the final `IndexerConfig` instance.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the database path is missing or any value
    /// fails [`IndexerConfig::validate`].
    pub fn build(self) -> Result<IndexerConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let workers = if self.workers.is_empty() {
            vec![WorkerConfig::default()]
        } else {
            self.workers
        };

        let config = IndexerConfig {
            database_path,
            chunk_size: self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            workers,
            job_timeout: self.job_timeout.unwrap_or(Duration::from_secs(15 * 60)),
            poll_interval: self.poll_interval.unwrap_or(Duration::from_millis(1000)),
            max_attempts: self.max_attempts.unwrap_or(3),
            results_expire_in: self
                .results_expire_in
                .unwrap_or(Duration::from_secs(3600)),
        };

        config.validate()?;

        Ok(config)
    }
}
