//! Batch normalizer
//!
//! Collapses a batch of raw plays into the distinct natural keys it
//! references, one set per entity kind.

use crate::source::RawPlay;
use core_library::{AlbumKey, TrackKey};
use std::collections::HashSet;

/// Distinct keys referenced by a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniqueKeys {
    pub artists: HashSet<String>,
    pub albums: HashSet<AlbumKey>,
    pub tracks: HashSet<TrackKey>,
}

impl UniqueKeys {
    pub fn is_empty(&self) -> bool {
        self.artists.is_empty()
    }
}

/// Track key of a play; an empty or absent album folds to the empty sentinel.
pub fn track_key(play: &RawPlay) -> TrackKey {
    TrackKey::new(play.artist.as_str(), play.album(), play.track.as_str())
}

/// Album key of a play, `None` when the play has no album.
pub fn album_key(play: &RawPlay) -> Option<AlbumKey> {
    play.album()
        .map(|album| AlbumKey::new(play.artist.as_str(), album))
}

pub fn extract_unique_keys(plays: &[RawPlay]) -> UniqueKeys {
    let mut keys = UniqueKeys::default();

    for play in plays {
        keys.artists.insert(play.artist.clone());
        if let Some(album) = album_key(play) {
            keys.albums.insert(album);
        }
        keys.tracks.insert(track_key(play));
    }

    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deduplicates_by_natural_key() {
        let plays = vec![
            RawPlay::new("X", Some("A1"), "T1", 1),
            RawPlay::new("X", Some("A1"), "T2", 2),
            RawPlay::new("X", Some("A1"), "T2", 3),
        ];

        let keys = extract_unique_keys(&plays);

        assert_eq!(keys.artists.len(), 1);
        assert_eq!(keys.albums.len(), 1);
        assert_eq!(keys.tracks.len(), 2);
        assert!(keys.albums.contains(&AlbumKey::new("X", "A1")));
    }

    #[test]
    fn test_album_less_track_is_distinct() {
        let plays = vec![
            RawPlay::new("X", None, "T1", 1),
            RawPlay::new("X", Some(""), "T1", 2),
            RawPlay::new("X", Some("A1"), "T1", 3),
        ];

        let keys = extract_unique_keys(&plays);

        assert_eq!(keys.albums.len(), 1, "empty album yields no album key");
        assert_eq!(keys.tracks.len(), 2);
        assert!(keys.tracks.contains(&TrackKey::new("X", None, "T1")));
        assert!(keys.tracks.contains(&TrackKey::new("X", Some("A1"), "T1")));
    }

    #[test]
    fn test_same_album_name_under_different_artists() {
        let plays = vec![
            RawPlay::new("X", Some("Greatest Hits"), "T1", 1),
            RawPlay::new("Y", Some("Greatest Hits"), "T1", 2),
        ];

        let keys = extract_unique_keys(&plays);

        assert_eq!(keys.artists.len(), 2);
        assert_eq!(keys.albums.len(), 2);
        assert_eq!(keys.tracks.len(), 2);
    }

    #[test]
    fn test_empty_batch() {
        let keys = extract_unique_keys(&[]);
        assert!(keys.is_empty());
        assert!(keys.tracks.is_empty());
    }
}
