use std::fmt;
use std::str::FromStr;

use color_eyre::eyre::Result;
use serde::{Deserialize, Serialize};

/// External systems a playlist can live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Spotify,
    Tidal,
    Youtube,
    Rekordbox,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Spotify => "spotify",
            Platform::Tidal => "tidal",
            Platform::Youtube => "youtube",
            Platform::Rekordbox => "rekordbox",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spotify" => Ok(Platform::Spotify),
            "tidal" => Ok(Platform::Tidal),
            "youtube" => Ok(Platform::Youtube),
            "rekordbox" => Ok(Platform::Rekordbox),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// Canonical track record at the client boundary. Clients normalize their
/// native shapes into this before anything reaches the resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformTrack {
    pub platform: Platform,
    /// Content id, the one used when reading membership and adding tracks.
    pub id: String,
    /// Membership-specific id required for removal (e.g. a YouTube
    /// playlist-item id). Only meaningful within the playlist it was read from.
    pub removal_id: Option<String>,
    pub title: String,
    pub artist: String,
    pub duration_ms: Option<i32>,
    pub uri: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Canonical playlist record at the client boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformPlaylist {
    pub platform: Platform,
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Owned/writable remotely. Drives personal vs. shared sync semantics.
    pub is_owner: bool,
    pub is_public: bool,
    pub track_count: i32,
    pub uri: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Port trait wrapping the platform API capabilities used by the sync engine.
///
/// Implementations live in `clients::*` (production) or test mocks. Remote
/// calls are serial and blocking from the engine's perspective; retry and
/// rate-limit handling belong inside the implementation, not here.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait PlatformClient: Send + Sync {
    fn platform(&self) -> Platform;

    async fn is_authenticated(&self) -> bool;

    async fn get_all_playlists(&self) -> Result<Vec<PlatformPlaylist>>;

    async fn get_playlist_tracks(&self, platform_playlist_id: &str) -> Result<Vec<PlatformTrack>>;

    async fn create_playlist(&self, name: &str, description: &str) -> Result<PlatformPlaylist>;

    async fn add_tracks_to_playlist(
        &self,
        platform_playlist_id: &str,
        track_ids: &[String],
    ) -> Result<bool>;

    async fn remove_tracks_from_playlist(
        &self,
        platform_playlist_id: &str,
        track_ids: &[String],
    ) -> Result<bool>;

    /// Fetch a playlist and its full track listing in one call.
    async fn import_playlist_to_local(
        &self,
        platform_playlist_id: &str,
    ) -> Result<(Vec<PlatformTrack>, PlatformPlaylist)>;

    /// Push tracks to a new playlist, or an existing one when an id is given.
    /// Returns the remote playlist id.
    async fn export_tracks_to_playlist(
        &self,
        name: &str,
        track_ids: &[String],
        existing_playlist_id: Option<String>,
    ) -> Result<String>;

    /// Delete (or unfollow) a playlist. Used by test-session teardown.
    async fn delete_playlist(&self, platform_playlist_id: &str) -> Result<bool>;
}
