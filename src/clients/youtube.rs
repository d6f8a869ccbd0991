use color_eyre::eyre::{Result, WrapErr};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use url::Url;

use crate::config::YoutubeConfig;
use crate::error::SyncError;
use crate::ports::platform::{Platform, PlatformClient, PlatformPlaylist, PlatformTrack};

const API_BASE: &str = "https://www.googleapis.com/youtube/v3/";
const PAGE_SIZE: &str = "50";

/* ---------- API response shapes ---------- */

#[derive(Debug, Clone, Deserialize)]
struct YoutubeListResponse<T> {
    // default = "Vec::new" keeps the derive from demanding T: Default
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct YoutubeChannel {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct YoutubePlaylistResource {
    id: String,
    snippet: YoutubePlaylistSnippet,
    #[serde(rename = "contentDetails", default)]
    content_details: Option<YoutubeContentDetails>,
    #[serde(default)]
    status: Option<YoutubeStatus>,
}

#[derive(Debug, Clone, Deserialize)]
struct YoutubePlaylistSnippet {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "channelId")]
    channel_id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct YoutubeContentDetails {
    #[serde(rename = "itemCount", default)]
    item_count: i32,
}

#[derive(Debug, Clone, Deserialize)]
struct YoutubeStatus {
    #[serde(rename = "privacyStatus", default)]
    privacy_status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct YoutubePlaylistItem {
    /// Playlist-item id, the handle required for removal. Distinct from the
    /// video id and only meaningful within this playlist.
    id: String,
    snippet: YoutubePlaylistItemSnippet,
}

#[derive(Debug, Clone, Deserialize)]
struct YoutubePlaylistItemSnippet {
    title: String,
    #[serde(rename = "videoOwnerChannelTitle", default)]
    video_owner_channel_title: Option<String>,
    #[serde(rename = "resourceId")]
    resource_id: YoutubeResourceId,
}

#[derive(Debug, Clone, Deserialize)]
struct YoutubeResourceId {
    #[serde(rename = "videoId")]
    video_id: String,
}

/* ---------- Client ---------- */

/// YouTube Data API v3 client using a pre-obtained OAuth access token.
///
/// The membership handle a playlist item is removed by is its playlist-item
/// id, not the video id; this client surfaces both through
/// [`PlatformTrack::id`] (video) and [`PlatformTrack::removal_id`] (item).
pub struct YoutubeClient {
    http: Client,
    access_token: String,
    channel_id: Mutex<Option<String>>,
}

impl YoutubeClient {
    pub fn new(config: &YoutubeConfig) -> Self {
        Self {
            http: Client::new(),
            access_token: config.access_token.clone(),
            channel_id: Mutex::new(None),
        }
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> Result<Url> {
        let mut url = Url::parse(API_BASE)?
            .join(path)
            .wrap_err("Failed to build YouTube API url")?;
        url.query_pairs_mut().extend_pairs(params);
        Ok(url)
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
            .wrap_err("Failed to deserialize YouTube response")
    }

    /// Follow nextPageToken until the listing runs out.
    async fn get_all_pages<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.url(path, params)?;
            url.query_pairs_mut().append_pair("maxResults", PAGE_SIZE);
            if let Some(ref token) = page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }

            let page: YoutubeListResponse<T> = self.get_json(url).await?;
            items.extend(page.items);

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(items)
    }

    async fn my_channel_id(&self) -> Result<String> {
        let mut cached = self.channel_id.lock().await;
        if let Some(ref id) = *cached {
            return Ok(id.clone());
        }

        let response: YoutubeListResponse<YoutubeChannel> = self
            .get_json(self.url("channels", &[("part", "id"), ("mine", "true")])?)
            .await?;
        let channel = response
            .items
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::NotFound("authenticated YouTube channel".to_string()))?;

        *cached = Some(channel.id.clone());
        Ok(channel.id)
    }

    fn to_platform_playlist(&self, p: YoutubePlaylistResource, channel_id: &str) -> PlatformPlaylist {
        let is_public = p
            .status
            .as_ref()
            .and_then(|s| s.privacy_status.as_deref())
            .map(|s| s == "public")
            .unwrap_or(false);
        PlatformPlaylist {
            platform: Platform::Youtube,
            is_owner: p.snippet.channel_id == channel_id,
            is_public,
            track_count: p.content_details.as_ref().map(|c| c.item_count).unwrap_or(0),
            uri: Some(format!("https://www.youtube.com/playlist?list={}", p.id)),
            id: p.id,
            name: p.snippet.title,
            description: Some(p.snippet.description).filter(|d| !d.is_empty()),
            metadata: serde_json::Value::Null,
        }
    }
}

#[async_trait::async_trait]
impl PlatformClient for YoutubeClient {
    fn platform(&self) -> Platform {
        Platform::Youtube
    }

    async fn is_authenticated(&self) -> bool {
        !self.access_token.is_empty() && self.my_channel_id().await.is_ok()
    }

    async fn get_all_playlists(&self) -> Result<Vec<PlatformPlaylist>> {
        let channel_id = self.my_channel_id().await?;
        let raw: Vec<YoutubePlaylistResource> = self
            .get_all_pages(
                "playlists",
                &[
                    ("part", "snippet,status,contentDetails"),
                    ("mine", "true"),
                ],
            )
            .await?;

        Ok(raw
            .into_iter()
            .map(|p| self.to_platform_playlist(p, &channel_id))
            .collect())
    }

    async fn get_playlist_tracks(&self, platform_playlist_id: &str) -> Result<Vec<PlatformTrack>> {
        let items: Vec<YoutubePlaylistItem> = self
            .get_all_pages(
                "playlistItems",
                &[("part", "snippet"), ("playlistId", platform_playlist_id)],
            )
            .await?;

        Ok(items
            .into_iter()
            .map(|item| {
                let video_id = item.snippet.resource_id.video_id;
                PlatformTrack {
                    platform: Platform::Youtube,
                    uri: Some(format!("https://www.youtube.com/watch?v={video_id}")),
                    id: video_id,
                    removal_id: Some(item.id),
                    title: item.snippet.title,
                    artist: item
                        .snippet
                        .video_owner_channel_title
                        .unwrap_or_else(|| "Unknown".to_string()),
                    duration_ms: None,
                    metadata: serde_json::Value::Null,
                }
            })
            .collect())
    }

    async fn create_playlist(&self, name: &str, description: &str) -> Result<PlatformPlaylist> {
        let channel_id = self.my_channel_id().await?;
        let url = self.url("playlists", &[("part", "snippet,status,contentDetails")])?;

        let created: YoutubePlaylistResource = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&json!({
                "snippet": { "title": name, "description": description },
                "status": { "privacyStatus": "private" },
            }))
            .send()
            .await
            .map_err(|e| SyncError::PlatformApi(e.to_string()))?
            .error_for_status()
            .map_err(|e| SyncError::PlatformApi(e.to_string()))?
            .json()
            .await
            .wrap_err("Failed to deserialize create playlist response")?;

        Ok(self.to_platform_playlist(created, &channel_id))
    }

    async fn add_tracks_to_playlist(
        &self,
        platform_playlist_id: &str,
        track_ids: &[String],
    ) -> Result<bool> {
        if track_ids.is_empty() {
            return Ok(false);
        }
        let url = self.url("playlistItems", &[("part", "snippet")])?;

        // The API inserts one item per call
        for video_id in track_ids {
            self.http
                .post(url.clone())
                .bearer_auth(&self.access_token)
                .json(&json!({
                    "snippet": {
                        "playlistId": platform_playlist_id,
                        "resourceId": { "kind": "youtube#video", "videoId": video_id },
                    },
                }))
                .send()
                .await
                .map_err(|e| SyncError::PlatformApi(e.to_string()))?
                .error_for_status()
                .map_err(|e| SyncError::PlatformApi(e.to_string()))?;
        }

        Ok(true)
    }

    /// `track_ids` here are playlist-item ids, not video ids.
    async fn remove_tracks_from_playlist(
        &self,
        _platform_playlist_id: &str,
        track_ids: &[String],
    ) -> Result<bool> {
        if track_ids.is_empty() {
            return Ok(false);
        }

        for item_id in track_ids {
            let url = self.url("playlistItems", &[("id", item_id)])?;
            self.http
                .delete(url)
                .bearer_auth(&self.access_token)
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
        let channel_id = self.my_channel_id().await?;
        let response: YoutubeListResponse<YoutubePlaylistResource> = self
            .get_json(self.url(
                "playlists",
                &[
                    ("part", "snippet,status,contentDetails"),
                    ("id", platform_playlist_id),
                ],
            )?)
            .await?;
        let playlist = response
            .items
            .into_iter()
            .next()
            .ok_or_else(|| {
                SyncError::NotFound(format!("youtube playlist {platform_playlist_id}"))
            })?;

        let tracks = self.get_playlist_tracks(platform_playlist_id).await?;
        Ok((tracks, self.to_platform_playlist(playlist, &channel_id)))
    }

    async fn export_tracks_to_playlist(
        &self,
        name: &str,
        track_ids: &[String],
        existing_playlist_id: Option<String>,
    ) -> Result<String> {
        let playlist_id = match existing_playlist_id {
            Some(id) => id,
            None => self.create_playlist(name, "").await?.id,
        };
        self.add_tracks_to_playlist(&playlist_id, track_ids).await?;
        Ok(playlist_id)
    }

    async fn delete_playlist(&self, platform_playlist_id: &str) -> Result<bool> {
        let url = self.url("playlists", &[("id", platform_playlist_id)])?;

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
                "delete playlist returned {status}"
            ))
            .into());
        }

        Ok(true)
    }
}
