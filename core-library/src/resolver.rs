//! # Entity Resolver
//!
//! Turns a set of natural keys into stored records, creating whatever does
//! not exist yet. Each resolution is
//!
//! 1. one chunked lookup of every desired key,
//! 2. one chunked `INSERT ... ON CONFLICT DO NOTHING RETURNING` of the keys
//!    that were not found,
//! 3. a second lookup for keys another writer created between 1 and 2.
//!
//! The returned map holds exactly one record per desired key. Anything else
//! is reported as [`LibraryError::InvariantViolation`].
//!
//! Albums are created under artists and tracks under artists and albums, so
//! resolution runs top-down and each level takes the maps of the levels
//! above it. A parent key missing from the supplied map is a caller bug and
//! fails the whole resolution before anything is written.

use crate::error::{LibraryError, Result};
use crate::models::{Album, AlbumKey, Artist, NaturalKey, NewAlbum, NewTrack, Tag, Track, TrackKey};
use crate::repositories::{
    DynAlbumRepository, DynArtistRepository, DynTagRepository, DynTrackRepository,
    EntityRepository, SqliteAlbumRepository, SqliteArtistRepository, SqliteTagRepository,
    SqliteTrackRepository,
};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub type ArtistMap = HashMap<String, Artist>;
pub type AlbumMap = HashMap<AlbumKey, Album>;
pub type TrackMap = HashMap<TrackKey, Track>;
pub type TagMap = HashMap<String, Tag>;

/// Outcome of resolving one entity kind
#[derive(Debug, Clone)]
pub struct Resolution<K, E> {
    /// One record per desired key
    pub entities: HashMap<K, E>,
    /// How many of them this call inserted
    pub created: usize,
}

impl<K, E> Default for Resolution<K, E> {
    fn default() -> Self {
        Self {
            entities: HashMap::new(),
            created: 0,
        }
    }
}

/// Get-or-create over the shared entity tables
#[derive(Clone)]
pub struct EntityResolver {
    artists: Arc<DynArtistRepository>,
    albums: Arc<DynAlbumRepository>,
    tracks: Arc<DynTrackRepository>,
    tags: Arc<DynTagRepository>,
}

impl EntityResolver {
    pub fn new(
        artists: Arc<DynArtistRepository>,
        albums: Arc<DynAlbumRepository>,
        tracks: Arc<DynTrackRepository>,
        tags: Arc<DynTagRepository>,
    ) -> Self {
        Self {
            artists,
            albums,
            tracks,
            tags,
        }
    }

    /// Resolver over the SQLite repositories, `chunk_size` keys per statement.
    pub fn sqlite(pool: SqlitePool, chunk_size: usize) -> Self {
        Self::new(
            Arc::new(SqliteArtistRepository::new(pool.clone()).with_chunk_size(chunk_size)),
            Arc::new(SqliteAlbumRepository::new(pool.clone()).with_chunk_size(chunk_size)),
            Arc::new(SqliteTrackRepository::new(pool.clone()).with_chunk_size(chunk_size)),
            Arc::new(SqliteTagRepository::new(pool).with_chunk_size(chunk_size)),
        )
    }

    #[instrument(skip_all, fields(keys = names.len()))]
    pub async fn resolve_artists(&self, names: &HashSet<String>) -> Result<Resolution<String, Artist>> {
        get_or_create(self.artists.as_ref(), "artist", names, |name| Ok(name.clone())).await
    }

    #[instrument(skip_all, fields(keys = keys.len()))]
    pub async fn resolve_albums(
        &self,
        keys: &HashSet<AlbumKey>,
        artists: &ArtistMap,
    ) -> Result<Resolution<AlbumKey, Album>> {
        get_or_create(self.albums.as_ref(), "album", keys, |key| {
            let artist = parent(artists, &key.artist, "artist", key)?;
            Ok(NewAlbum {
                name: key.album.clone(),
                artist_id: artist.id,
                artist_name: artist.name.clone(),
            })
        })
        .await
    }

    #[instrument(skip_all, fields(keys = keys.len()))]
    pub async fn resolve_tracks(
        &self,
        keys: &HashSet<TrackKey>,
        artists: &ArtistMap,
        albums: &AlbumMap,
    ) -> Result<Resolution<TrackKey, Track>> {
        get_or_create(self.tracks.as_ref(), "track", keys, |key| {
            let artist = parent(artists, &key.artist, "artist", key)?;
            let album = match key.album_key() {
                Some(album_key) => Some(parent(albums, &album_key, "album", key)?),
                None => None,
            };

            Ok(NewTrack {
                name: key.track.clone(),
                artist_id: artist.id,
                album_id: album.map(|a| a.id),
                artist_name: artist.name.clone(),
                album_name: album.map(|a| a.name.clone()),
            })
        })
        .await
    }

    #[instrument(skip_all, fields(keys = names.len()))]
    pub async fn resolve_tags(&self, names: &HashSet<String>) -> Result<Resolution<String, Tag>> {
        get_or_create(self.tags.as_ref(), "tag", names, |name| Ok(name.clone())).await
    }
}

fn parent<'m, K, V>(map: &'m HashMap<K, V>, key: &K, kind: &str, child: &dyn Display) -> Result<&'m V>
where
    K: Hash + Eq + Display,
{
    map.get(key).ok_or_else(|| {
        LibraryError::InvariantViolation(format!(
            "{} '{}' referenced by '{}' is not resolved",
            kind, key, child
        ))
    })
}

/// Lookup, create what is missing, re-fetch what a concurrent writer
/// created, then check every desired key has a record.
async fn get_or_create<R, F>(
    repo: &R,
    kind: &'static str,
    desired: &HashSet<R::Key>,
    mut build: F,
) -> Result<Resolution<R::Key, R::Entity>>
where
    R: EntityRepository + ?Sized,
    R::Key: Hash + Eq + Clone + Display,
    R::Entity: NaturalKey<Key = R::Key>,
    F: FnMut(&R::Key) -> Result<R::NewEntity>,
{
    if desired.is_empty() {
        return Ok(Resolution::default());
    }

    let keys: Vec<R::Key> = desired.iter().cloned().collect();
    let mut entities = HashMap::with_capacity(keys.len());
    absorb(&mut entities, repo.find_by_keys(&keys).await?);

    let missing: Vec<R::Key> = keys
        .into_iter()
        .filter(|key| !entities.contains_key(key))
        .collect();

    let mut created = 0;
    if !missing.is_empty() {
        let new_entities = missing.iter().map(&mut build).collect::<Result<Vec<_>>>()?;

        let inserted = repo.insert_missing(&new_entities).await?;
        created = inserted.len();
        absorb(&mut entities, inserted);

        let raced: Vec<R::Key> = missing
            .into_iter()
            .filter(|key| !entities.contains_key(key))
            .collect();
        if !raced.is_empty() {
            debug!(kind, keys = raced.len(), "Re-fetching rows created concurrently");
            absorb(&mut entities, repo.find_by_keys(&raced).await?);
        }
    }

    if let Some(unresolved) = desired.iter().find(|key| !entities.contains_key(*key)) {
        warn!(kind, key = %unresolved, "Resolution incomplete");
        return Err(LibraryError::InvariantViolation(format!(
            "{} '{}' has no stored record after get-or-create",
            kind, unresolved
        )));
    }

    debug!(kind, resolved = entities.len(), created, "Resolved entities");
    Ok(Resolution { entities, created })
}

fn absorb<K, E>(map: &mut HashMap<K, E>, records: Vec<E>)
where
    K: Hash + Eq,
    E: NaturalKey<Key = K>,
{
    for record in records {
        map.insert(record.natural_key(), record);
    }
}
