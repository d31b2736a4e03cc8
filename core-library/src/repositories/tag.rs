//! Tag repository

use crate::error::Result;
use crate::models::Tag;
use crate::repositories::{lookup_in_chunks, EntityRepository, DEFAULT_LOOKUP_CHUNK_SIZE};
use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

pub struct SqliteTagRepository {
    pool: SqlitePool,
    chunk_size: usize,
}

impl SqliteTagRepository {
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

    async fn select_by_names(&self, names: &[String]) -> Result<Vec<Tag>> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT id, name FROM tags WHERE name IN (");
        let mut separated = builder.separated(", ");
        for name in names {
            separated.push_bind(name);
        }
        separated.push_unseparated(")");

        Ok(builder.build_query_as::<Tag>().fetch_all(&self.pool).await?)
    }

    async fn insert_names(&self, names: &[String]) -> Result<Vec<Tag>> {
        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new("INSERT INTO tags (name) ");
        builder.push_values(names, |mut row, name| {
            row.push_bind(name);
        });
        builder.push(" ON CONFLICT DO NOTHING RETURNING id, name");

        Ok(builder.build_query_as::<Tag>().fetch_all(&self.pool).await?)
    }
}

#[async_trait]
impl EntityRepository for SqliteTagRepository {
    type Key = String;
    type NewEntity = String;
    type Entity = Tag;

    async fn find_by_keys(&self, names: &[String]) -> Result<Vec<Tag>> {
        lookup_in_chunks(names, self.chunk_size, |chunk| self.select_by_names(chunk)).await
    }

    async fn insert_missing(&self, names: &[String]) -> Result<Vec<Tag>> {
        let mut created = Vec::with_capacity(names.len());
        for chunk in names.chunks(self.chunk_size.max(1)) {
            created.extend(self.insert_names(chunk).await?);
        }
        Ok(created)
    }

    async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tags")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
