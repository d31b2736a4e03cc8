//! Track repository

use crate::error::Result;
use crate::models::{NewTrack, Track, TrackKey};
use crate::repositories::{lookup_in_chunks, EntityRepository, DEFAULT_LOOKUP_CHUNK_SIZE};
use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;

/// SQLite implementation of the track table.
///
/// Tracks are keyed by (artist name, album name or empty, track name). The
/// album-less track matches on the empty string through `COALESCE`, the same
/// way the unique index folds a missing album id to 0.
pub struct SqliteTrackRepository {
    pool: SqlitePool,
    chunk_size: usize,
}

impl SqliteTrackRepository {
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

    async fn select_by_keys(&self, keys: &[TrackKey]) -> Result<Vec<Track>> {
        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            r#"
            SELECT t.id, t.name, t.artist_id, t.album_id,
                   ar.name AS artist_name, al.name AS album_name
            FROM tracks t
            JOIN artists ar ON ar.id = t.artist_id
            LEFT JOIN albums al ON al.id = t.album_id
            WHERE (ar.name, COALESCE(al.name, ''), t.name) IN (
            "#,
        );
        builder.push_values(keys, |mut row, key| {
            row.push_bind(&key.artist)
                .push_bind(&key.album)
                .push_bind(&key.track);
        });
        builder.push(")");

        Ok(builder.build_query_as::<Track>().fetch_all(&self.pool).await?)
    }

    async fn insert_rows(&self, tracks: &[NewTrack]) -> Result<Vec<Track>> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("INSERT INTO tracks (name, artist_id, album_id) ");
        builder.push_values(tracks, |mut row, track| {
            row.push_bind(&track.name)
                .push_bind(track.artist_id)
                .push_bind(track.album_id);
        });
        builder.push(" ON CONFLICT DO NOTHING RETURNING id, name, artist_id, album_id");

        let rows: Vec<(i64, String, i64, Option<i64>)> =
            builder.build_query_as().fetch_all(&self.pool).await?;

        let requested: HashMap<(i64, Option<i64>, &str), &NewTrack> = tracks
            .iter()
            .map(|track| ((track.artist_id, track.album_id, track.name.as_str()), track))
            .collect();

        Ok(rows
            .into_iter()
            .filter_map(|(id, name, artist_id, album_id)| {
                let payload = requested.get(&(artist_id, album_id, name.as_str()))?;
                Some(Track {
                    id,
                    artist_id,
                    album_id,
                    artist_name: payload.artist_name.clone(),
                    album_name: payload.album_name.clone(),
                    name,
                })
            })
            .collect())
    }
}

#[async_trait]
impl EntityRepository for SqliteTrackRepository {
    type Key = TrackKey;
    type NewEntity = NewTrack;
    type Entity = Track;

    async fn find_by_keys(&self, keys: &[TrackKey]) -> Result<Vec<Track>> {
        lookup_in_chunks(keys, self.chunk_size, |chunk| self.select_by_keys(chunk)).await
    }

    async fn insert_missing(&self, tracks: &[NewTrack]) -> Result<Vec<Track>> {
        let mut created = Vec::with_capacity(tracks.len());
        for chunk in tracks.chunks(self.chunk_size.max(1)) {
            created.extend(self.insert_rows(chunk).await?);
        }
        Ok(created)
    }

    async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tracks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
