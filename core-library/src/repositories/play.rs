//! Play repository trait and implementation

use crate::error::Result;
use crate::models::Play;
use crate::repositories::DEFAULT_LOOKUP_CHUNK_SIZE;
use async_trait::async_trait;
use sqlx::{query_as, QueryBuilder, Sqlite, SqlitePool};

/// Append-only store of listen events
#[async_trait]
pub trait PlayRepository: Send + Sync {
    /// Append `plays`, returning the number of rows written.
    async fn insert_many(&self, plays: &[Play]) -> Result<u64>;

    /// Number of plays stored for a user.
    async fn count_for_user(&self, user_id: i64) -> Result<i64>;
}

pub struct SqlitePlayRepository {
    pool: SqlitePool,
    chunk_size: usize,
}

impl SqlitePlayRepository {
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
}

#[async_trait]
impl PlayRepository for SqlitePlayRepository {
    async fn insert_many(&self, plays: &[Play]) -> Result<u64> {
        let mut written = 0;

        for chunk in plays.chunks(self.chunk_size.max(1)) {
            let mut builder: QueryBuilder<'_, Sqlite> =
                QueryBuilder::new("INSERT INTO plays (user_id, track_id, scrobbled_at) ");
            builder.push_values(chunk, |mut row, play| {
                row.push_bind(play.user_id)
                    .push_bind(play.track_id)
                    .push_bind(play.scrobbled_at);
            });

            written += builder.build().execute(&self.pool).await?.rows_affected();
        }

        Ok(written)
    }

    async fn count_for_user(&self, user_id: i64) -> Result<i64> {
        let (count,): (i64,) = query_as("SELECT COUNT(*) FROM plays WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use chrono::{TimeZone, Utc};

    async fn seed_track(pool: &SqlitePool) -> (i64, i64) {
        let (user_id,): (i64,) = sqlx::query_as(
            "INSERT INTO users (username, created_at) VALUES ('flicker', ?) RETURNING id",
        )
        .bind(Utc::now())
        .fetch_one(pool)
        .await
        .unwrap();
        let (artist_id,): (i64,) =
            sqlx::query_as("INSERT INTO artists (name) VALUES ('X') RETURNING id")
                .fetch_one(pool)
                .await
                .unwrap();
        let (track_id,): (i64,) =
            sqlx::query_as("INSERT INTO tracks (name, artist_id) VALUES ('T1', ?) RETURNING id")
                .bind(artist_id)
                .fetch_one(pool)
                .await
                .unwrap();
        (user_id, track_id)
    }

    #[tokio::test]
    async fn test_insert_many_in_chunks() {
        let pool = create_test_pool().await.unwrap();
        let (user_id, track_id) = seed_track(&pool).await;
        let repo = SqlitePlayRepository::new(pool).with_chunk_size(2);

        let plays: Vec<Play> = (0..5)
            .map(|i| Play {
                user_id,
                track_id,
                scrobbled_at: Utc.timestamp_opt(1_700_000_000 + i, 0).unwrap(),
            })
            .collect();

        assert_eq!(repo.insert_many(&plays).await.unwrap(), 5);
        assert_eq!(repo.count_for_user(user_id).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_insert_nothing() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqlitePlayRepository::new(pool);
        assert_eq!(repo.insert_many(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_play_requires_existing_track() {
        let pool = create_test_pool().await.unwrap();
        let (user_id, _) = seed_track(&pool).await;
        let repo = SqlitePlayRepository::new(pool);

        let result = repo
            .insert_many(&[Play {
                user_id,
                track_id: 9999,
                scrobbled_at: Utc::now(),
            }])
            .await;
        assert!(result.is_err());
    }
}
