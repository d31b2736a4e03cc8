//! Domain models for the listening-history store
//!
//! Entities are identified in storage by surrogate `i64` keys, and by their
//! natural key everywhere else in the pipeline. The natural key types in
//! this module are what the resolver maps are keyed by.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

// =============================================================================
// Natural Keys
// =============================================================================

/// Records that can be addressed by a business key independent of their id.
pub trait NaturalKey {
    type Key;

    fn natural_key(&self) -> Self::Key;
}

/// Natural key of an album: owning artist name plus album name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlbumKey {
    pub artist: String,
    pub album: String,
}

impl AlbumKey {
    pub fn new(artist: impl Into<String>, album: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            album: album.into(),
        }
    }
}

impl fmt::Display for AlbumKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.artist, self.album)
    }
}

/// Natural key of a track.
///
/// `album` is the empty string for tracks played without an album, so a
/// single flat key covers both cases and the no-album track never collides
/// with a same-named track on an album.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackKey {
    pub artist: String,
    pub album: String,
    pub track: String,
}

impl TrackKey {
    pub fn new(
        artist: impl Into<String>,
        album: Option<&str>,
        track: impl Into<String>,
    ) -> Self {
        Self {
            artist: artist.into(),
            album: album.unwrap_or_default().to_string(),
            track: track.into(),
        }
    }

    /// The album component, `None` for the empty sentinel.
    pub fn album(&self) -> Option<&str> {
        if self.album.is_empty() {
            None
        } else {
            Some(&self.album)
        }
    }

    /// Key of the album this track belongs to, if any.
    pub fn album_key(&self) -> Option<AlbumKey> {
        self.album()
            .map(|album| AlbumKey::new(self.artist.clone(), album))
    }
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.album() {
            Some(album) => write!(f, "{} - {} ({})", self.artist, self.track, album),
            None => write!(f, "{} - {}", self.artist, self.track),
        }
    }
}

// =============================================================================
// Entities
// =============================================================================

/// Indexed user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub created_at: DateTime<Utc>,
    /// Set after the last successful ingestion
    pub last_indexed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Artist {
    pub id: i64,
    pub name: String,
}

impl NaturalKey for Artist {
    type Key = String;

    fn natural_key(&self) -> String {
        self.name.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Album {
    pub id: i64,
    pub name: String,
    pub artist_id: i64,
    /// Name of the owning artist (joined, not stored on the row)
    pub artist_name: String,
}

impl NaturalKey for Album {
    type Key = AlbumKey;

    fn natural_key(&self) -> AlbumKey {
        AlbumKey::new(self.artist_name.clone(), self.name.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Track {
    pub id: i64,
    pub name: String,
    pub artist_id: i64,
    pub album_id: Option<i64>,
    /// Name of the owning artist (joined)
    pub artist_name: String,
    /// Name of the owning album (joined), `None` for album-less tracks
    pub album_name: Option<String>,
}

impl NaturalKey for Track {
    type Key = TrackKey;

    fn natural_key(&self) -> TrackKey {
        TrackKey::new(
            self.artist_name.clone(),
            self.album_name.as_deref(),
            self.name.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

impl NaturalKey for Tag {
    type Key = String;

    fn natural_key(&self) -> String {
        self.name.clone()
    }
}

// =============================================================================
// Insert Payloads
// =============================================================================

/// Album row to create. Carries the artist name so the created record can
/// be keyed without a second query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAlbum {
    pub name: String,
    pub artist_id: i64,
    pub artist_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTrack {
    pub name: String,
    pub artist_id: i64,
    pub album_id: Option<i64>,
    pub artist_name: String,
    pub album_name: Option<String>,
}

// =============================================================================
// Plays & Counts
// =============================================================================

/// One historical listen event, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Play {
    pub user_id: i64,
    pub track_id: i64,
    pub scrobbled_at: DateTime<Utc>,
}

/// Play-count delta (when written) or running total (when read) for a
/// user and artist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ArtistCount {
    pub user_id: i64,
    pub artist_id: i64,
    pub playcount: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AlbumCount {
    pub user_id: i64,
    pub album_id: i64,
    pub playcount: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TrackCount {
    pub user_id: i64,
    pub track_id: i64,
    pub playcount: i64,
}
