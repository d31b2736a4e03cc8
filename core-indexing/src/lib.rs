//! # Scrobble Indexing
//!
//! Turns a user's raw listening history into shared catalog entities and
//! per-user play counts, and runs that work in the background.
//!
//! ## Overview
//!
//! A batch of raw plays goes through four stages:
//! - Normalizing the batch into distinct artist, album and track keys
//! - Resolving every key to a stored entity, creating what is missing
//! - Aggregating plays into per-entity count deltas
//! - Writing play records and incrementing the user's counts
//!
//! ## Components
//!
//! - **Source** (`source`): Raw play record and the `ScrobbleSource` seam
//! - **Normalizer** (`normalizer`): Distinct natural keys of a batch
//! - **Aggregator** (`aggregator`): Play records and count deltas
//! - **Indexer** (`indexer`): The pipeline over the library repositories
//! - **Jobs** (`job`, `queue`): Durable job queue with leases and backoff
//! - **Task Server** (`task_server`, `handlers`): Named tasks on a bounded worker pool

pub mod aggregator;
pub mod error;
pub mod handlers;
pub mod indexer;
pub mod job;
pub mod normalizer;
pub mod queue;
pub mod source;
pub mod task_server;

pub use aggregator::{aggregate, Aggregation};
pub use error::{IndexingError, Result};
pub use handlers::{IndexUserHandler, TestTaskHandler};
pub use indexer::{open_store, IngestSummary, Indexer};
pub use job::{Job, JobId, JobStatus};
pub use normalizer::{extract_unique_keys, UniqueKeys};
pub use queue::{JobQueue, JobQueueRepository, QueueStats, SqliteJobQueueRepository};
pub use source::{RawPlay, ScrobbleSource};
pub use task_server::{JobHandler, TaskServer, INDEX_USER_TASK, LEASE_GRACE, TEST_TASK};
