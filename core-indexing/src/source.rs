//! Scrobble-history source
//!
//! The pipeline consumes plays through [`ScrobbleSource`]. The concrete API
//! client lives outside this crate; tests substitute a mock.

use crate::error::{IndexingError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One listen event as reported by the scrobble-history API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawPlay {
    pub artist: String,
    /// Absent or empty when the play was not attributed to an album
    #[serde(default)]
    pub album: Option<String>,
    pub track: String,
    /// Unix epoch seconds
    pub timestamp: i64,
}

impl RawPlay {
    pub fn new(
        artist: impl Into<String>,
        album: Option<&str>,
        track: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            artist: artist.into(),
            album: album.map(str::to_string),
            track: track.into(),
            timestamp,
        }
    }

    /// Album name, `None` for both an absent and an empty album field.
    pub fn album(&self) -> Option<&str> {
        self.album.as_deref().filter(|album| !album.is_empty())
    }

    /// Reject plays that cannot be keyed.
    pub fn validate(&self) -> Result<()> {
        if self.artist.is_empty() {
            return Err(IndexingError::InvalidPlay(format!(
                "play of '{}' at {} has no artist",
                self.track, self.timestamp
            )));
        }
        if self.track.is_empty() {
            return Err(IndexingError::InvalidPlay(format!(
                "play by '{}' at {} has no track",
                self.artist, self.timestamp
            )));
        }
        Ok(())
    }
}

/// Provider of a user's listening history
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScrobbleSource: Send + Sync {
    /// Fetch the plays of `username`, authorized by `token`.
    ///
    /// # Errors
    ///
    /// Implementations report transport and authorization failures as
    /// [`IndexingError::SourceUnavailable`].
    async fn fetch_plays(&self, username: &str, token: &str) -> Result<Vec<RawPlay>>;
}
