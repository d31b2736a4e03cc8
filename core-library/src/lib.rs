//! # Listening-History Library
//!
//! Owns the scrobble database: schema and migrations, repositories for the
//! shared entity tables and per-user data, and the entity resolver that
//! get-or-creates artists, albums, tracks and tags in bulk.
//!
//! ## Overview
//!
//! - [`db`]: connection pool, migrations, health check
//! - [`models`]: stored records and their natural keys
//! - [`repositories`]: chunked bulk lookup and SQLite repositories
//! - [`resolver`]: natural key to record resolution, creating missing rows

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;
pub mod resolver;

pub use error::{LibraryError, Result};
pub use models::{
    Album, AlbumCount, AlbumKey, Artist, ArtistCount, NaturalKey, NewAlbum, NewTrack, Play, Tag,
    Track, TrackCount, TrackKey, User,
};
pub use resolver::{AlbumMap, ArtistMap, EntityResolver, Resolution, TagMap, TrackMap};
