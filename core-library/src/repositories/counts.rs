//! Per-user play-count repository
//!
//! Count rows are running totals. Writing a batch adds its deltas to the
//! stored totals (`playcount = playcount + excluded.playcount`), creating the
//! row on first occurrence.

use crate::error::Result;
use crate::models::{AlbumCount, ArtistCount, TrackCount};
use crate::repositories::{lookup_in_chunks, DEFAULT_LOOKUP_CHUNK_SIZE};
use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

#[async_trait]
pub trait CountRepository: Send + Sync {
    /// Add each delta to the user's running artist total.
    async fn increment_artist_counts(&self, deltas: &[ArtistCount]) -> Result<()>;

    async fn increment_album_counts(&self, deltas: &[AlbumCount]) -> Result<()>;

    async fn increment_track_counts(&self, deltas: &[TrackCount]) -> Result<()>;

    /// Totals of `user_id` for the given artists. Artists the user never
    /// played are absent.
    async fn find_artist_counts(&self, user_id: i64, artist_ids: &[i64]) -> Result<Vec<ArtistCount>>;

    async fn find_album_counts(&self, user_id: i64, album_ids: &[i64]) -> Result<Vec<AlbumCount>>;

    async fn find_track_counts(&self, user_id: i64, track_ids: &[i64]) -> Result<Vec<TrackCount>>;
}

pub struct SqliteCountRepository {
    pool: SqlitePool,
    chunk_size: usize,
}

/// Table and entity column of one count kind
#[derive(Clone, Copy)]
struct CountTable {
    table: &'static str,
    column: &'static str,
}

const ARTIST_COUNTS: CountTable = CountTable {
    table: "artist_counts",
    column: "artist_id",
};
const ALBUM_COUNTS: CountTable = CountTable {
    table: "album_counts",
    column: "album_id",
};
const TRACK_COUNTS: CountTable = CountTable {
    table: "track_counts",
    column: "track_id",
};

impl SqliteCountRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            chunk_size: DEFAULT_LOOKUP_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Upsert `(user_id, entity_id, delta)` rows into `target`.
    async fn increment(&self, target: CountTable, rows: &[(i64, i64, i64)]) -> Result<()> {
        for chunk in rows.chunks(self.chunk_size.max(1)) {
            let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
                "INSERT INTO {} (user_id, {}, playcount) ",
                target.table, target.column
            ));
            builder.push_values(chunk, |mut row, (user_id, entity_id, delta)| {
                row.push_bind(*user_id)
                    .push_bind(*entity_id)
                    .push_bind(*delta);
            });
            builder.push(format!(
                " ON CONFLICT(user_id, {}) DO UPDATE SET playcount = playcount + excluded.playcount",
                target.column
            ));

            builder.build().execute(&self.pool).await?;
        }

        Ok(())
    }

    async fn select_counts(
        &self,
        target: CountTable,
        user_id: i64,
        entity_ids: &[i64],
    ) -> Result<Vec<(i64, i64, i64)>> {
        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
            "SELECT user_id, {}, playcount FROM {} WHERE user_id = ",
            target.column, target.table
        ));
        builder.push_bind(user_id);
        builder.push(format!(" AND {} IN (", target.column));
        let mut separated = builder.separated(", ");
        for id in entity_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        Ok(builder.build_query_as().fetch_all(&self.pool).await?)
    }

    async fn find(
        &self,
        target: CountTable,
        user_id: i64,
        entity_ids: &[i64],
    ) -> Result<Vec<(i64, i64, i64)>> {
        lookup_in_chunks(entity_ids, self.chunk_size, |chunk| {
            self.select_counts(target, user_id, chunk)
        })
        .await
    }
}

#[async_trait]
impl CountRepository for SqliteCountRepository {
    async fn increment_artist_counts(&self, deltas: &[ArtistCount]) -> Result<()> {
        let rows: Vec<_> = deltas
            .iter()
            .map(|c| (c.user_id, c.artist_id, c.playcount))
            .collect();
        self.increment(ARTIST_COUNTS, &rows).await
    }

    async fn increment_album_counts(&self, deltas: &[AlbumCount]) -> Result<()> {
        let rows: Vec<_> = deltas
            .iter()
            .map(|c| (c.user_id, c.album_id, c.playcount))
            .collect();
        self.increment(ALBUM_COUNTS, &rows).await
    }

    async fn increment_track_counts(&self, deltas: &[TrackCount]) -> Result<()> {
        let rows: Vec<_> = deltas
            .iter()
            .map(|c| (c.user_id, c.track_id, c.playcount))
            .collect();
        self.increment(TRACK_COUNTS, &rows).await
    }

    async fn find_artist_counts(&self, user_id: i64, artist_ids: &[i64]) -> Result<Vec<ArtistCount>> {
        let rows = self.find(ARTIST_COUNTS, user_id, artist_ids).await?;
        Ok(rows
            .into_iter()
            .map(|(user_id, artist_id, playcount)| ArtistCount {
                user_id,
                artist_id,
                playcount,
            })
            .collect())
    }

    async fn find_album_counts(&self, user_id: i64, album_ids: &[i64]) -> Result<Vec<AlbumCount>> {
        let rows = self.find(ALBUM_COUNTS, user_id, album_ids).await?;
        Ok(rows
            .into_iter()
            .map(|(user_id, album_id, playcount)| AlbumCount {
                user_id,
                album_id,
                playcount,
            })
            .collect())
    }

    async fn find_track_counts(&self, user_id: i64, track_ids: &[i64]) -> Result<Vec<TrackCount>> {
        let rows = self.find(TRACK_COUNTS, user_id, track_ids).await?;
        Ok(rows
            .into_iter()
            .map(|(user_id, track_id, playcount)| TrackCount {
                user_id,
                track_id,
                playcount,
            })
            .collect())
    }
}
