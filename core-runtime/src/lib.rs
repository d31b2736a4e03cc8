//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the scrobble indexer:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus for job and indexing lifecycle events
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that the library and indexing
//! crates depend on. It establishes the logging conventions, the validated
//! configuration object handed to the task server, and the broadcast channel
//! used to observe background work.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{IndexerConfig, IndexerConfigBuilder, WorkerConfig};
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus, EventStream};
