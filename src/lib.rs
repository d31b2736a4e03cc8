//! Workspace facade crate.
//!
//! Re-exports the individual workspace crates (`core-runtime`,
//! `core-library`, `core-indexing`) so host applications can depend on
//! `scrobble-indexer` alone. The `indexing` feature (on by default) pulls in
//! the ingestion pipeline and the job queue.

pub use core_library as library;
pub use core_runtime as runtime;

#[cfg(feature = "indexing")]
pub use core_indexing as indexing;
