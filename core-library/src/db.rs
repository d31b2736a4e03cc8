//! # Database
//!
//! Opens the SQLite store that holds the shared catalog (artists, albums,
//! tracks, tags), the per-user plays and counts, and the job queue.
//!
//! Every pool is opened with:
//! - WAL journaling, so lookups from other jobs do not block the writer
//! - foreign keys on, so a play can never point at a missing track
//! - a busy timeout, so concurrent ingestions queue up on the write lock
//! - the embedded migrations applied and a `SELECT 1` health check
//!
//! ```rust,ignore
//! use core_library::db::{open, StoreConfig};
//!
//! let pool = open(StoreConfig::file("scrobbles.db")).await?;
//! let test_pool = core_library::db::create_test_pool().await?;
//! ```

use crate::{LibraryError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const IN_MEMORY: &str = ":memory:";

/// Where the store lives and how many connections may reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Database file, `:memory:` for a private in-memory database
    pub path: PathBuf,
    pub max_connections: u32,
    /// How long a query waits for the write lock before failing
    pub busy_timeout: Duration,
    /// How long a caller waits for a free connection
    pub acquire_timeout: Duration,
}

impl StoreConfig {
    /// Store backed by the file at `path`, created if missing.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(10),
            acquire_timeout: Duration::from_secs(30),
        }
    }

    /// Private in-memory store.
    ///
    /// Each connection to `:memory:` sees its own database, so the pool
    /// keeps exactly one connection open for its whole life.
    pub fn in_memory() -> Self {
        Self {
            max_connections: 1,
            ..Self::file(IN_MEMORY)
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.path == Path::new(IN_MEMORY)
    }
}

/// Open a pool for `config`, migrate it and check it answers.
///
/// # Errors
///
/// [`LibraryError::Database`] if the store cannot be opened or fails the
/// health check, [`LibraryError::Migration`] if the schema cannot be applied.
pub async fn open(config: StoreConfig) -> Result<SqlitePool> {
    info!(
        path = %config.path.display(),
        max_connections = config.max_connections,
        "Opening scrobble store"
    );

    let options = if config.is_in_memory() {
        SqliteConnectOptions::from_str("sqlite::memory:").map_err(LibraryError::Database)?
    } else {
        SqliteConnectOptions::new().filename(&config.path)
    };
    let options = options
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(config.busy_timeout);

    let mut pool_options = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout);
    if config.is_in_memory() {
        // Recycling the only connection would drop the database with it.
        pool_options = pool_options
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }

    let pool = pool_options.connect_with(options).await.map_err(|e| {
        warn!(error = %e, path = %config.path.display(), "Cannot open scrobble store");
        LibraryError::Database(e)
    })?;

    migrate(&pool).await?;
    health_check(&pool).await?;

    debug!(connections = pool.size(), "Scrobble store ready");
    Ok(pool)
}

/// Migrated in-memory store, for tests.
pub async fn create_test_pool() -> Result<SqlitePool> {
    open(StoreConfig::in_memory()).await
}

async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        warn!(error = %e, "Schema migration failed");
        LibraryError::Migration(e.to_string())
    })?;
    debug!("Schema up to date");
    Ok(())
}

/// Verify the pool can serve a trivial query.
pub async fn health_check(pool: &SqlitePool) -> Result<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(LibraryError::Database)?;
    Ok(())
}
