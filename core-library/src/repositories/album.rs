//! Album repository

use crate::error::Result;
use crate::models::{Album, AlbumKey, NewAlbum};
use crate::repositories::{lookup_in_chunks, EntityRepository, DEFAULT_LOOKUP_CHUNK_SIZE};
use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;

/// SQLite implementation of the album table, keyed by (artist name, album name).
pub struct SqliteAlbumRepository {
    pool: SqlitePool,
    chunk_size: usize,
}

impl SqliteAlbumRepository {
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

    async fn select_by_keys(&self, keys: &[AlbumKey]) -> Result<Vec<Album>> {
        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            r#"
            SELECT al.id, al.name, al.artist_id, ar.name AS artist_name
            FROM albums al
            JOIN artists ar ON ar.id = al.artist_id
            WHERE (ar.name, al.name) IN (
            "#,
        );
        builder.push_values(keys, |mut row, key| {
            row.push_bind(&key.artist).push_bind(&key.album);
        });
        builder.push(")");

        Ok(builder.build_query_as::<Album>().fetch_all(&self.pool).await?)
    }

    async fn insert_rows(&self, albums: &[NewAlbum]) -> Result<Vec<Album>> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("INSERT INTO albums (name, artist_id) ");
        builder.push_values(albums, |mut row, album| {
            row.push_bind(&album.name).push_bind(album.artist_id);
        });
        builder.push(" ON CONFLICT DO NOTHING RETURNING id, name, artist_id");

        let rows: Vec<(i64, String, i64)> = builder.build_query_as().fetch_all(&self.pool).await?;

        // RETURNING cannot join, so the artist name comes from the payload
        let requested: HashMap<(i64, &str), &NewAlbum> = albums
            .iter()
            .map(|album| ((album.artist_id, album.name.as_str()), album))
            .collect();

        Ok(rows
            .into_iter()
            .filter_map(|(id, name, artist_id)| {
                let artist_name = requested
                    .get(&(artist_id, name.as_str()))?
                    .artist_name
                    .clone();
                Some(Album {
                    id,
                    name,
                    artist_id,
                    artist_name,
                })
            })
            .collect())
    }
}

#[async_trait]
impl EntityRepository for SqliteAlbumRepository {
    type Key = AlbumKey;
    type NewEntity = NewAlbum;
    type Entity = Album;

    async fn find_by_keys(&self, keys: &[AlbumKey]) -> Result<Vec<Album>> {
        lookup_in_chunks(keys, self.chunk_size, |chunk| self.select_by_keys(chunk)).await
    }

    async fn insert_missing(&self, albums: &[NewAlbum]) -> Result<Vec<Album>> {
        let mut created = Vec::with_capacity(albums.len());
        for chunk in albums.chunks(self.chunk_size.max(1)) {
            created.extend(self.insert_rows(chunk).await?);
        }
        Ok(created)
    }

    async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM albums")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::repositories::SqliteArtistRepository;

    async fn setup() -> (SqliteAlbumRepository, i64, i64) {
        let pool = create_test_pool().await.unwrap();
        let artists = SqliteArtistRepository::new(pool.clone());
        let created = artists
            .insert_missing(&["Low".to_string(), "Slint".to_string()])
            .await
            .unwrap();
        let id_of = |name: &str| created.iter().find(|a| a.name == name).unwrap().id;
        (SqliteAlbumRepository::new(pool), id_of("Low"), id_of("Slint"))
    }

    fn new_album(name: &str, artist_id: i64, artist_name: &str) -> NewAlbum {
        NewAlbum {
            name: name.to_string(),
            artist_id,
            artist_name: artist_name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_same_album_name_under_two_artists() {
        let (repo, low, slint) = setup().await;

        let created = repo
            .insert_missing(&[
                new_album("Untitled", low, "Low"),
                new_album("Untitled", slint, "Slint"),
            ])
            .await
            .unwrap();
        assert_eq!(created.len(), 2);

        let found = repo
            .find_by_keys(&[AlbumKey::new("Slint", "Untitled")])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].artist_id, slint);
        assert_eq!(found[0].artist_name, "Slint");
    }

    #[tokio::test]
    async fn test_created_albums_carry_artist_name() {
        let (repo, low, _) = setup().await;

        let created = repo
            .insert_missing(&[new_album("Things We Lost in the Fire", low, "Low")])
            .await
            .unwrap();
        assert_eq!(created[0].artist_name, "Low");

        let again = repo
            .insert_missing(&[new_album("Things We Lost in the Fire", low, "Low")])
            .await
            .unwrap();
        assert!(again.is_empty());
        assert_eq!(repo.count().await.unwrap(), 1);
    }
}
