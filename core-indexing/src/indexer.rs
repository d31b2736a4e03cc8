//! # Indexer
//!
//! Ingests a batch of raw plays for one user:
//!
//! ```text
//! raw plays ─> normalize ─> resolve artists ─> resolve albums ─> resolve tracks
//!                                                                     │
//!            write plays + increment counts <─ aggregate <────────────┘
//! ```
//!
//! Stages run sequentially and any failure aborts the batch. Entities
//! created before the failure stay; they are valid regardless of whether
//! the batch completes. Plays and counts are only written once every
//! stage before them succeeded.
//!
//! Count rows are increments, so ingesting the same batch twice doubles the
//! user's totals while leaving the entity tables unchanged.

use crate::aggregator::aggregate;
use crate::error::{IndexingError, Result};
use crate::normalizer::extract_unique_keys;
use crate::source::{RawPlay, ScrobbleSource};
use chrono::Utc;
use core_library::db::{open, StoreConfig};
use core_library::repositories::{
    CountRepository, PlayRepository, SqliteCountRepository, SqlitePlayRepository,
    SqliteUserRepository, UserRepository,
};
use core_library::EntityResolver;
use core_runtime::config::IndexerConfig;
use core_runtime::events::{CoreEvent, EventBus, IndexingEvent};
use core_runtime::logging::redact_if_sensitive;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// Open the store at `config.database_path` with a connection per job slot.
pub async fn open_store(config: &IndexerConfig) -> Result<SqlitePool> {
    let store = StoreConfig::file(&config.database_path);
    let store = if store.is_in_memory() {
        StoreConfig::in_memory()
    } else {
        let slots = u32::try_from(config.total_concurrency()).unwrap_or(u32::MAX);
        let connections = store.max_connections.max(slots);
        store.max_connections(connections)
    };

    Ok(open(store).await?)
}

/// What one ingestion wrote
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub user_id: i64,
    pub plays: u64,
    pub artists: usize,
    pub albums: usize,
    pub tracks: usize,
    pub artists_created: usize,
    pub albums_created: usize,
    pub tracks_created: usize,
}

/// Entry point of the ingestion pipeline
pub struct Indexer {
    resolver: EntityResolver,
    users: Arc<dyn UserRepository>,
    plays: Arc<dyn PlayRepository>,
    counts: Arc<dyn CountRepository>,
    source: Option<Arc<dyn ScrobbleSource>>,
    events: Option<EventBus>,
}

impl Indexer {
    pub fn new(
        resolver: EntityResolver,
        users: Arc<dyn UserRepository>,
        plays: Arc<dyn PlayRepository>,
        counts: Arc<dyn CountRepository>,
    ) -> Self {
        Self {
            resolver,
            users,
            plays,
            counts,
            source: None,
            events: None,
        }
    }

    /// Indexer over the SQLite repositories, `chunk_size` keys per statement.
    pub fn sqlite(pool: SqlitePool, chunk_size: usize) -> Self {
        Self::new(
            EntityResolver::sqlite(pool.clone(), chunk_size),
            Arc::new(SqliteUserRepository::new(pool.clone())),
            Arc::new(SqlitePlayRepository::new(pool.clone()).with_chunk_size(chunk_size)),
            Arc::new(SqliteCountRepository::new(pool).with_chunk_size(chunk_size)),
        )
    }

    /// [`Indexer::sqlite`] with the configured chunk size.
    pub fn from_config(pool: SqlitePool, config: &IndexerConfig) -> Self {
        Self::sqlite(pool, config.chunk_size)
    }

    /// Source used by [`Indexer::index_user`].
    pub fn with_source(mut self, source: Arc<dyn ScrobbleSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Publish an [`IndexingEvent`] per finished ingestion.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Fetch `username`'s history from the scrobble source and ingest it.
    pub async fn index_user(&self, username: &str, token: &str) -> Result<IngestSummary> {
        let source = self.source.as_ref().ok_or_else(|| {
            IndexingError::SourceUnavailable("no scrobble source configured".to_string())
        })?;

        debug!(
            user = username,
            token = %redact_if_sensitive("token", token),
            "Fetching plays"
        );

        let plays = match source.fetch_plays(username, token).await {
            Ok(plays) => plays,
            Err(e) => {
                self.emit_failure(username, &e);
                return Err(e);
            }
        };

        self.ingest_plays(username, &plays).await
    }

    /// Ingest `plays` for `username`, creating the user if needed.
    pub async fn ingest_plays(&self, username: &str, plays: &[RawPlay]) -> Result<IngestSummary> {
        let span = info_span!("ingest", user = username, plays = plays.len());

        match self.run_pipeline(username, plays).instrument(span).await {
            Ok(summary) => {
                info!(
                    user = username,
                    plays = summary.plays,
                    artists_created = summary.artists_created,
                    albums_created = summary.albums_created,
                    tracks_created = summary.tracks_created,
                    "User indexed"
                );
                if let Some(events) = &self.events {
                    events
                        .emit(CoreEvent::Indexing(IndexingEvent::Completed {
                            username: username.to_string(),
                            plays: summary.plays,
                            artists_created: summary.artists_created as u64,
                            albums_created: summary.albums_created as u64,
                            tracks_created: summary.tracks_created as u64,
                        }))
                        .ok();
                }
                Ok(summary)
            }
            Err(e) => {
                warn!(user = username, error = %e, "Indexing failed");
                self.emit_failure(username, &e);
                Err(e)
            }
        }
    }

    async fn run_pipeline(&self, username: &str, plays: &[RawPlay]) -> Result<IngestSummary> {
        for play in plays {
            play.validate()?;
        }

        let user = self.users.get_or_create(username).await?;

        let keys = extract_unique_keys(plays);
        debug!(
            artists = keys.artists.len(),
            albums = keys.albums.len(),
            tracks = keys.tracks.len(),
            "Normalized batch"
        );

        let artists = self.resolver.resolve_artists(&keys.artists).await?;
        let albums = self
            .resolver
            .resolve_albums(&keys.albums, &artists.entities)
            .await?;
        let tracks = self
            .resolver
            .resolve_tracks(&keys.tracks, &artists.entities, &albums.entities)
            .await?;

        let aggregation = aggregate(
            plays,
            &artists.entities,
            &albums.entities,
            &tracks.entities,
            user.id,
        )?;

        let written = self.plays.insert_many(&aggregation.plays).await?;
        self.counts
            .increment_artist_counts(&aggregation.artist_counts)
            .await?;
        self.counts
            .increment_album_counts(&aggregation.album_counts)
            .await?;
        self.counts
            .increment_track_counts(&aggregation.track_counts)
            .await?;

        self.users.mark_indexed(user.id, Utc::now()).await?;

        Ok(IngestSummary {
            user_id: user.id,
            plays: written,
            artists: artists.entities.len(),
            albums: albums.entities.len(),
            tracks: tracks.entities.len(),
            artists_created: artists.created,
            albums_created: albums.created,
            tracks_created: tracks.created,
        })
    }

    fn emit_failure(&self, username: &str, error: &IndexingError) {
        if let Some(events) = &self.events {
            events
                .emit(CoreEvent::Indexing(IndexingEvent::Failed {
                    username: username.to_string(),
                    message: error.to_string(),
                }))
                .ok();
        }
    }
}
