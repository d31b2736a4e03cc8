//! User repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::User;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{query, query_as, SqlitePool};

/// User repository interface
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Find a user by username
    ///
    /// # Returns
    /// - `Ok(Some(user))` if found
    /// - `Ok(None)` if not found
    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Return the user named `username`, creating it first if needed.
    ///
    /// Safe to call concurrently for the same name: the loser of an insert
    /// race reads the winner's row.
    async fn get_or_create(&self, username: &str) -> Result<User>;

    /// Stamp the time of the last successful ingestion.
    async fn mark_indexed(&self, user_id: i64, at: DateTime<Utc>) -> Result<()>;
}

pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = query_as::<_, User>(
            "SELECT id, username, created_at, last_indexed_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn get_or_create(&self, username: &str) -> Result<User> {
        if username.trim().is_empty() {
            return Err(LibraryError::InvalidInput {
                field: "username".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        query("INSERT INTO users (username, created_at) VALUES (?, ?) ON CONFLICT DO NOTHING")
            .bind(username)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        self.find_by_username(username)
            .await?
            .ok_or_else(|| LibraryError::NotFound {
                entity_type: "User".to_string(),
                key: username.to_string(),
            })
    }

    async fn mark_indexed(&self, user_id: i64, at: DateTime<Utc>) -> Result<()> {
        let result = query("UPDATE users SET last_indexed_at = ? WHERE id = ?")
            .bind(at)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::NotFound {
                entity_type: "User".to_string(),
                key: user_id.to_string(),
            });
        }

        Ok(())
    }
}
