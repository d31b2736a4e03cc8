//! Aggregator
//!
//! Folds a batch of raw plays into storage-ready play records and one count
//! delta per (user, entity). Pure: reads the resolved maps, performs no I/O.

use crate::error::{IndexingError, Result};
use crate::normalizer::{album_key, track_key};
use crate::source::RawPlay;
use chrono::{DateTime, Utc};
use core_library::{AlbumCount, AlbumMap, ArtistCount, ArtistMap, Play, TrackCount, TrackMap};
use std::collections::BTreeMap;

/// Everything one batch writes for a user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregation {
    pub artist_counts: Vec<ArtistCount>,
    pub album_counts: Vec<AlbumCount>,
    pub track_counts: Vec<TrackCount>,
    pub plays: Vec<Play>,
}

pub fn aggregate(
    plays: &[RawPlay],
    artists: &ArtistMap,
    albums: &AlbumMap,
    tracks: &TrackMap,
    user_id: i64,
) -> Result<Aggregation> {
    let mut artist_counter: BTreeMap<i64, i64> = BTreeMap::new();
    let mut album_counter: BTreeMap<i64, i64> = BTreeMap::new();
    let mut track_counter: BTreeMap<i64, i64> = BTreeMap::new();
    let mut records = Vec::with_capacity(plays.len());

    for play in plays {
        let artist = artists.get(&play.artist).ok_or_else(|| {
            IndexingError::InvariantViolation(format!("artist '{}' is not resolved", play.artist))
        })?;
        *artist_counter.entry(artist.id).or_default() += 1;

        if let Some(key) = album_key(play) {
            let album = albums.get(&key).ok_or_else(|| {
                IndexingError::InvariantViolation(format!("album '{}' is not resolved", key))
            })?;
            *album_counter.entry(album.id).or_default() += 1;
        }

        let key = track_key(play);
        let track = tracks.get(&key).ok_or_else(|| {
            IndexingError::InvariantViolation(format!("track '{}' is not resolved", key))
        })?;
        *track_counter.entry(track.id).or_default() += 1;

        records.push(Play {
            user_id,
            track_id: track.id,
            scrobbled_at: scrobbled_at(play)?,
        });
    }

    Ok(Aggregation {
        artist_counts: artist_counter
            .into_iter()
            .map(|(artist_id, playcount)| ArtistCount {
                user_id,
                artist_id,
                playcount,
            })
            .collect(),
        album_counts: album_counter
            .into_iter()
            .map(|(album_id, playcount)| AlbumCount {
                user_id,
                album_id,
                playcount,
            })
            .collect(),
        track_counts: track_counter
            .into_iter()
            .map(|(track_id, playcount)| TrackCount {
                user_id,
                track_id,
                playcount,
            })
            .collect(),
        plays: records,
    })
}

fn scrobbled_at(play: &RawPlay) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(play.timestamp, 0).ok_or_else(|| {
        IndexingError::InvalidPlay(format!(
            "timestamp {} of '{} - {}' is out of range",
            play.timestamp, play.artist, play.track
        ))
    })
}
