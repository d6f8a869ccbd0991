use color_eyre::eyre::{Result, WrapErr};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use url::Url;

use crate::cache::TtlCache;
use crate::config::SpotifyConfig;
use crate::error::SyncError;
use crate::ports::platform::{Platform, PlatformClient, PlatformPlaylist, PlatformTrack};

const API_BASE: &str = "https://api.spotify.com/v1/";

/// Tracks are added/removed in batches of at most this size per call.
const TRACK_BATCH_SIZE: usize = 100;

/* ---------- API response shapes ---------- */

#[derive(Debug, Clone, Deserialize)]
struct Paging<T> {
    items: Vec<T>,
    next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SpotifyUser {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SpotifyPlaylistObject {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    public: Option<bool>,
    owner: SpotifyUser,
    tracks: SpotifyPlaylistTracksRef,
    uri: String,
    #[serde(default)]
    snapshot_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SpotifyPlaylistTracksRef {
    #[serde(default)]
    total: i32,
}

#[derive(Debug, Clone, Deserialize)]
struct SpotifyPlaylistItem {
    track: Option<SpotifyTrackObject>,
}

#[derive(Debug, Clone, Deserialize)]
struct SpotifyTrackObject {
    id: Option<String>,
    name: String,
    duration_ms: i32,
    artists: Vec<SpotifyArtist>,
    uri: String,
    #[serde(default)]
    is_local: bool,
    #[serde(default)]
    album: Option<SpotifyAlbum>,
}

#[derive(Debug, Clone, Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SpotifyAlbum {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SpotifyCreatedPlaylist {
    id: String,
}

/* ---------- Client ---------- */

/// Spotify Web API client using a pre-obtained user access token.
///
/// Playlist listings go through an injected [`TtlCache`] so repeated diffs
/// inside one run do not refetch; the owner of the cache decides its TTL and
/// when to invalidate.
pub struct SpotifyClient {
    http: Client,
    access_token: String,
    market: Option<String>,
    playlist_cache: TtlCache<String, Vec<PlatformPlaylist>>,
    current_user: Mutex<Option<String>>,
}

impl SpotifyClient {
    pub fn new(config: &SpotifyConfig, playlist_cache: TtlCache<String, Vec<PlatformPlaylist>>) -> Self {
        Self {
            http: Client::new(),
            access_token: config.access_token.clone(),
            market: config.market.clone(),
            playlist_cache,
            current_user: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> Result<Url> {
        Url::parse(API_BASE)?
            .join(path)
            .wrap_err("Failed to build Spotify API url")
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T> {
        self.http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| SyncError::PlatformApi(e.to_string()))?
            .error_for_status()
            .map_err(|e| SyncError::PlatformApi(e.to_string()))?
            .json::<T>()
            .await
            .wrap_err("Failed to deserialize Spotify response")
    }

    async fn current_user_id(&self) -> Result<String> {
        let mut cached = self.current_user.lock().await;
        if let Some(ref id) = *cached {
            return Ok(id.clone());
        }
        let user: SpotifyUser = self.get_json(self.url("me")?).await?;
        *cached = Some(user.id.clone());
        Ok(user.id)
    }

    /// Follow the `next` cursor until the paging runs out.
    async fn get_all_pages<T: serde::de::DeserializeOwned>(&self, first: Url) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(first);

        while let Some(url) = next {
            let page: Paging<T> = self.get_json(url).await?;
            items.extend(page.items);
            next = match page.next {
                Some(url) => Some(Url::parse(&url).wrap_err("Bad paging cursor from Spotify")?),
                None => None,
            };
        }

        Ok(items)
    }

    fn to_platform_playlist(&self, p: SpotifyPlaylistObject, user_id: &str) -> PlatformPlaylist {
        let metadata = json!({
            "snapshot_id": p.snapshot_id,
            "owner": p.owner.id,
        });
        PlatformPlaylist {
            platform: Platform::Spotify,
            is_owner: p.owner.id == user_id,
            is_public: p.public.unwrap_or(false),
            track_count: p.tracks.total,
            id: p.id,
            name: p.name,
            description: p.description.filter(|d| !d.is_empty()),
            uri: Some(p.uri),
            metadata,
        }
    }

    async fn get_playlist(&self, platform_playlist_id: &str) -> Result<PlatformPlaylist> {
        let user_id = self.current_user_id().await?;
        let playlist: SpotifyPlaylistObject = self
            .get_json(self.url(&format!("playlists/{platform_playlist_id}"))?)
            .await?;
        Ok(self.to_platform_playlist(playlist, &user_id))
    }

    async fn send_track_batches(
        &self,
        platform_playlist_id: &str,
        track_ids: &[String],
        replace: bool,
    ) -> Result<()> {
        let url = self.url(&format!("playlists/{platform_playlist_id}/tracks"))?;

        for (i, batch) in track_ids.chunks(TRACK_BATCH_SIZE).enumerate() {
            let uris: Vec<String> = batch.iter().map(|id| track_uri(id)).collect();
            let body = json!({ "uris": uris });

            // Replacing only makes sense for the first batch; the rest append
            let request = if replace && i == 0 {
                self.http.put(url.clone())
            } else {
                self.http.post(url.clone())
            };

            request
                .bearer_auth(&self.access_token)
                .json(&body)
                .send()
                .await
                .map_err(|e| SyncError::PlatformApi(e.to_string()))?
                .error_for_status()
                .map_err(|e| SyncError::PlatformApi(e.to_string()))?;
        }

        Ok(())
    }
}

/// Accepts either a bare track id or a full `spotify:track:` uri.
fn track_uri(id: &str) -> String {
    if id.starts_with("spotify:") {
        id.to_string()
    } else {
        format!("spotify:track:{id}")
    }
}

#[async_trait::async_trait]
impl PlatformClient for SpotifyClient {
    fn platform(&self) -> Platform {
        Platform::Spotify
    }

    async fn is_authenticated(&self) -> bool {
        !self.access_token.is_empty() && self.current_user_id().await.is_ok()
    }

    async fn get_all_playlists(&self) -> Result<Vec<PlatformPlaylist>> {
        let cache_key = "me".to_string();
        if let Some(playlists) = self.playlist_cache.get(&cache_key) {
            log::debug!("Spotify playlist listing served from cache");
            return Ok(playlists);
        }

        let user_id = self.current_user_id().await?;
        let raw: Vec<SpotifyPlaylistObject> =
            self.get_all_pages(self.url("me/playlists?limit=50")?).await?;
        let playlists: Vec<PlatformPlaylist> = raw
            .into_iter()
            .map(|p| self.to_platform_playlist(p, &user_id))
            .collect();

        self.playlist_cache.set(cache_key, playlists.clone());
        Ok(playlists)
    }

    async fn get_playlist_tracks(&self, platform_playlist_id: &str) -> Result<Vec<PlatformTrack>> {
        let mut path = format!("playlists/{platform_playlist_id}/tracks?limit=100");
        if let Some(ref market) = self.market {
            path.push_str(&format!("&market={market}"));
        }

        let items: Vec<SpotifyPlaylistItem> = self.get_all_pages(self.url(&path)?).await?;

        let tracks = items
            .into_iter()
            .filter_map(|item| item.track)
            // Local files have no Spotify id and cannot be synced
            .filter(|t| !t.is_local && t.id.is_some())
            .map(|t| {
                let id = t.id.clone().unwrap_or_default();
                let metadata = json!({
                    "album": t.album.as_ref().map(|a| a.name.clone()),
                });
                PlatformTrack {
                    platform: Platform::Spotify,
                    id,
                    removal_id: None,
                    title: t.name,
                    artist: t
                        .artists
                        .iter()
                        .map(|a| a.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                    duration_ms: Some(t.duration_ms),
                    uri: Some(t.uri),
                    metadata,
                }
            })
            .collect();

        Ok(tracks)
    }

    async fn create_playlist(&self, name: &str, description: &str) -> Result<PlatformPlaylist> {
        let user_id = self.current_user_id().await?;
        let url = self.url(&format!("users/{user_id}/playlists"))?;

        let created: SpotifyCreatedPlaylist = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&json!({
                "name": name,
                "description": description,
                "public": false,
            }))
            .send()
            .await
            .map_err(|e| SyncError::PlatformApi(e.to_string()))?
            .error_for_status()
            .map_err(|e| SyncError::PlatformApi(e.to_string()))?
            .json()
            .await
            .wrap_err("Failed to deserialize create playlist response")?;

        self.playlist_cache.clear();
        self.get_playlist(&created.id).await
    }

    async fn add_tracks_to_playlist(
        &self,
        platform_playlist_id: &str,
        track_ids: &[String],
    ) -> Result<bool> {
        if track_ids.is_empty() {
            return Ok(false);
        }
        self.send_track_batches(platform_playlist_id, track_ids, false)
            .await?;
        Ok(true)
    }

    async fn remove_tracks_from_playlist(
        &self,
        platform_playlist_id: &str,
        track_ids: &[String],
    ) -> Result<bool> {
        if track_ids.is_empty() {
            return Ok(false);
        }
        let url = self.url(&format!("playlists/{platform_playlist_id}/tracks"))?;

        for batch in track_ids.chunks(TRACK_BATCH_SIZE) {
            let tracks: Vec<serde_json::Value> =
                batch.iter().map(|id| json!({ "uri": track_uri(id) })).collect();

            self.http
                .delete(url.clone())
                .bearer_auth(&self.access_token)
                .json(&json!({ "tracks": tracks }))
                .send()
                .await
                .map_err(|e| SyncError::PlatformApi(e.to_string()))?
                .error_for_status()
                .map_err(|e| SyncError::PlatformApi(e.to_string()))?;
        }

        Ok(true)
    }

    async fn import_playlist_to_local(
        &self,
        platform_playlist_id: &str,
    ) -> Result<(Vec<PlatformTrack>, PlatformPlaylist)> {
        let playlist = self.get_playlist(platform_playlist_id).await?;
        let tracks = self.get_playlist_tracks(platform_playlist_id).await?;
        Ok((tracks, playlist))
    }

    async fn export_tracks_to_playlist(
        &self,
        name: &str,
        track_ids: &[String],
        existing_playlist_id: Option<String>,
    ) -> Result<String> {
        match existing_playlist_id {
            Some(id) => {
                // Replace the remote membership wholesale
                self.send_track_batches(&id, track_ids, true).await?;
                Ok(id)
            }
            None => {
                let playlist = self.create_playlist(name, "").await?;
                self.add_tracks_to_playlist(&playlist.id, track_ids).await?;
                Ok(playlist.id)
            }
        }
    }

    async fn delete_playlist(&self, platform_playlist_id: &str) -> Result<bool> {
        // Spotify has no hard delete; unfollowing removes it from the library
        let url = self.url(&format!("playlists/{platform_playlist_id}/followers"))?;

        let status = self
            .http
            .delete(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| SyncError::PlatformApi(e.to_string()))?
            .status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            return Err(SyncError::PlatformApi(format!(
                "unfollow playlist returned {status}"
            ))
            .into());
        }

        self.playlist_cache.clear();
        Ok(true)
    }
}
