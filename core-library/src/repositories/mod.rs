//! # Repository Pattern Implementation
//!
//! Repository traits and their SQLite implementations.
//!
//! ## Architecture
//!
//! - Shared entities (artists, albums, tracks, tags) implement
//!   [`EntityRepository`]: bulk lookup by natural key plus bulk
//!   create-if-absent. Both are chunked through [`lookup_in_chunks`].
//! - Per-user data (users, plays, counts) have their own traits.
//! - SQLite implementations use `sqlx::QueryBuilder` to build multi-row
//!   statements.
//!
//! ## Available Repositories
//!
//! - `SqliteArtistRepository` / `SqliteAlbumRepository` /
//!   `SqliteTrackRepository` / `SqliteTagRepository`
//! - `UserRepository` - indexed users
//! - `PlayRepository` - append-only listen events
//! - `CountRepository` - per-user play-count totals

pub mod album;
pub mod artist;
pub mod counts;
pub mod lookup;
pub mod play;
pub mod tag;
pub mod track;
pub mod user;

use crate::error::Result;
use crate::models::{Album, Artist, NewAlbum, NewTrack, Tag, Track, AlbumKey, TrackKey};
use async_trait::async_trait;

pub use album::SqliteAlbumRepository;
pub use artist::SqliteArtistRepository;
pub use counts::{CountRepository, SqliteCountRepository};
pub use lookup::{lookup_in_chunks, DEFAULT_LOOKUP_CHUNK_SIZE};
pub use play::{PlayRepository, SqlitePlayRepository};
pub use tag::SqliteTagRepository;
pub use track::SqliteTrackRepository;
pub use user::{SqliteUserRepository, UserRepository};

/// Bulk access to a shared entity table addressed by natural key.
#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Natural key
    type Key: Send + Sync;
    /// Payload needed to create a row
    type NewEntity: Send + Sync;
    /// Stored record
    type Entity: Send;

    /// Find every stored record whose natural key is in `keys`.
    ///
    /// Keys without a stored record are silently absent from the result.
    async fn find_by_keys(&self, keys: &[Self::Key]) -> Result<Vec<Self::Entity>>;

    /// Insert `entities`, skipping any whose natural key already exists.
    ///
    /// Returns only the rows this call created. A row that a concurrent
    /// writer created first is not returned; look it up instead.
    async fn insert_missing(&self, entities: &[Self::NewEntity]) -> Result<Vec<Self::Entity>>;

    /// Total number of stored records.
    async fn count(&self) -> Result<i64>;
}

pub type DynArtistRepository = dyn EntityRepository<Key = String, NewEntity = String, Entity = Artist>;
pub type DynAlbumRepository = dyn EntityRepository<Key = AlbumKey, NewEntity = NewAlbum, Entity = Album>;
pub type DynTrackRepository = dyn EntityRepository<Key = TrackKey, NewEntity = NewTrack, Entity = Track>;
pub type DynTagRepository = dyn EntityRepository<Key = String, NewEntity = String, Entity = Tag>;
