//! Artist repository

use crate::error::Result;
use crate::models::Artist;
use crate::repositories::{lookup_in_chunks, EntityRepository, DEFAULT_LOOKUP_CHUNK_SIZE};
use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

/// SQLite implementation of the artist table, keyed by exact name.
pub struct SqliteArtistRepository {
    pool: SqlitePool,
    chunk_size: usize,
}

impl SqliteArtistRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            chunk_size: DEFAULT_LOOKUP_CHUNK_SIZE,
        }
    }

    /// Override the number of names bound per statement.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    async fn select_by_names(&self, names: &[String]) -> Result<Vec<Artist>> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT id, name FROM artists WHERE name IN (");
        let mut separated = builder.separated(", ");
        for name in names {
            separated.push_bind(name);
        }
        separated.push_unseparated(")");

        let artists = builder
            .build_query_as::<Artist>()
            .fetch_all(&self.pool)
            .await?;
        Ok(artists)
    }

    async fn insert_names(&self, names: &[String]) -> Result<Vec<Artist>> {
        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new("INSERT INTO artists (name) ");
        builder.push_values(names, |mut row, name| {
            row.push_bind(name);
        });
        builder.push(" ON CONFLICT DO NOTHING RETURNING id, name");

        let created = builder
            .build_query_as::<Artist>()
            .fetch_all(&self.pool)
            .await?;
        Ok(created)
    }
}

#[async_trait]
impl EntityRepository for SqliteArtistRepository {
    type Key = String;
    type NewEntity = String;
    type Entity = Artist;

    async fn find_by_keys(&self, names: &[String]) -> Result<Vec<Artist>> {
        lookup_in_chunks(names, self.chunk_size, |chunk| self.select_by_names(chunk)).await
    }

    async fn insert_missing(&self, names: &[String]) -> Result<Vec<Artist>> {
        let mut created = Vec::with_capacity(names.len());
        for chunk in names.chunks(self.chunk_size.max(1)) {
            created.extend(self.insert_names(chunk).await?);
        }
        Ok(created)
    }

    async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM artists")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
