use std::sync::Arc;

use chrono::Utc;
use color_eyre::eyre::{Result, WrapErr};
use sea_orm::{ActiveModelBehavior, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};

use crate::database::Database;
use crate::entities;
use crate::error::SyncError;
use crate::ports::platform::{Platform, PlatformPlaylist, PlatformTrack};

/// Maps platform-native records onto canonical library entities, creating
/// them when absent. Lookup always goes through the platform-link tables;
/// playlists additionally fall back to the legacy inline columns.
pub struct ResolverService {
    db: Arc<Database>,
}

impl ResolverService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Look up a track by (platform, platform_id); refresh its mutable
    /// fields when found, create Track + TrackPlatformInfo otherwise.
    pub async fn resolve_track(&self, record: &PlatformTrack) -> Result<entities::track::Model> {
        let existing = entities::track_platform_info::Entity::find()
            .filter(
                entities::track_platform_info::Column::Platform.eq(record.platform.as_str()),
            )
            .filter(entities::track_platform_info::Column::PlatformId.eq(&record.id))
            .one(&self.db.conn)
            .await
            .wrap_err("Failed to fetch track platform info")?;

        if let Some(info) = existing {
            let track = entities::track::Entity::find_by_id(info.track_id)
                .one(&self.db.conn)
                .await
                .wrap_err("Failed to fetch track")?
                .ok_or_else(|| SyncError::NotFound(format!("track {}", info.track_id)))?;

            let mut track_model: entities::track::ActiveModel = track.into();
            track_model.title = Set(record.title.clone());
            track_model.artist = Set(record.artist.clone());
            track_model.duration_ms = Set(record.duration_ms);
            let track = track_model
                .update(&self.db.conn)
                .await
                .wrap_err("Failed to update track")?;

            let mut info_model: entities::track_platform_info::ActiveModel = info.into();
            info_model.uri = Set(record.uri.clone());
            info_model.metadata = Set(Some(record.metadata.to_string()));
            info_model.last_synced = Set(Some(Utc::now()));
            info_model.needs_update = Set(false);
            info_model
                .update(&self.db.conn)
                .await
                .wrap_err("Failed to update track platform info")?;

            tracing::debug!(
                "Refreshed track {} from {} record {}",
                track.id,
                record.platform,
                record.id
            );
            Ok(track)
        } else {
            let track = entities::track::ActiveModel {
                title: Set(record.title.clone()),
                artist: Set(record.artist.clone()),
                duration_ms: Set(record.duration_ms),
                ..entities::track::ActiveModel::new()
            };
            let track = track
                .insert(&self.db.conn)
                .await
                .wrap_err("Failed to create track")?;

            let info = entities::track_platform_info::ActiveModel {
                track_id: Set(track.id),
                platform: Set(record.platform.as_str().to_string()),
                platform_id: Set(record.id.clone()),
                uri: Set(record.uri.clone()),
                metadata: Set(Some(record.metadata.to_string())),
                last_synced: Set(Some(Utc::now())),
                ..entities::track_platform_info::ActiveModel::new()
            };
            info.insert(&self.db.conn)
                .await
                .wrap_err("Failed to create track platform info")?;

            tracing::debug!(
                "Created track {} from {} record {}",
                track.id,
                record.platform,
                record.id
            );
            Ok(track)
        }
    }

    /// Look up a playlist by its platform link, creating it when absent.
    /// `name_override` names a freshly created playlist.
    pub async fn resolve_playlist(
        &self,
        record: &PlatformPlaylist,
        name_override: Option<&str>,
    ) -> Result<entities::playlist::Model> {
        if let Some(playlist) = self.find_linked_playlist(record.platform, &record.id).await? {
            self.link_playlist(playlist.id, record).await?;
            return Ok(playlist);
        }

        let playlist = entities::playlist::ActiveModel {
            name: Set(name_override.unwrap_or(&record.name).to_string()),
            description: Set(record.description.clone()),
            ..entities::playlist::ActiveModel::new()
        };
        let playlist = playlist
            .insert(&self.db.conn)
            .await
            .wrap_err("Failed to create playlist")?;

        self.link_playlist(playlist.id, record).await?;

        tracing::debug!(
            "Created playlist {} from {} record {}",
            playlist.id,
            record.platform,
            record.id
        );
        Ok(playlist)
    }

    /// Upsert the modern link row for (playlist, platform), stamping
    /// last_linked and storing the canonical record as metadata.
    pub async fn link_playlist(&self, playlist_id: i64, record: &PlatformPlaylist) -> Result<()> {
        let metadata = serde_json::to_string(record).wrap_err("Failed to encode playlist record")?;

        let existing = entities::playlist_platform_info::Entity::find()
            .filter(entities::playlist_platform_info::Column::PlaylistId.eq(playlist_id))
            .filter(
                entities::playlist_platform_info::Column::Platform.eq(record.platform.as_str()),
            )
            .one(&self.db.conn)
            .await
            .wrap_err("Failed to fetch playlist platform info")?;

        match existing {
            Some(info) => {
                let mut model: entities::playlist_platform_info::ActiveModel = info.into();
                model.platform_id = Set(record.id.clone());
                model.uri = Set(record.uri.clone());
                model.metadata = Set(Some(metadata));
                model.last_linked = Set(Utc::now());
                model
                    .update(&self.db.conn)
                    .await
                    .wrap_err("Failed to update playlist platform info")?;
            }
            None => {
                let model = entities::playlist_platform_info::ActiveModel {
                    playlist_id: Set(playlist_id),
                    platform: Set(record.platform.as_str().to_string()),
                    platform_id: Set(record.id.clone()),
                    uri: Set(record.uri.clone()),
                    metadata: Set(Some(metadata)),
                    ..entities::playlist_platform_info::ActiveModel::new()
                };
                model
                    .insert(&self.db.conn)
                    .await
                    .wrap_err("Failed to create playlist platform info")?;
            }
        }

        Ok(())
    }

    /// The platform link for a playlist, if any. Modern table only.
    pub async fn playlist_link(
        &self,
        playlist_id: i64,
        platform: Platform,
    ) -> Result<Option<entities::playlist_platform_info::Model>> {
        entities::playlist_platform_info::Entity::find()
            .filter(entities::playlist_platform_info::Column::PlaylistId.eq(playlist_id))
            .filter(entities::playlist_platform_info::Column::Platform.eq(platform.as_str()))
            .one(&self.db.conn)
            .await
            .wrap_err("Failed to fetch playlist platform info")
    }

    /// The platform link for a track, if any.
    pub async fn track_link(
        &self,
        track_id: i64,
        platform: Platform,
    ) -> Result<Option<entities::track_platform_info::Model>> {
        entities::track_platform_info::Entity::find()
            .filter(entities::track_platform_info::Column::TrackId.eq(track_id))
            .filter(entities::track_platform_info::Column::Platform.eq(platform.as_str()))
            .one(&self.db.conn)
            .await
            .wrap_err("Failed to fetch track platform info")
    }

    /// Dual-path playlist lookup: the modern link table first, then the
    /// legacy inline columns. A legacy hit backfills a modern link row so the
    /// legacy path can eventually be retired.
    async fn find_linked_playlist(
        &self,
        platform: Platform,
        platform_id: &str,
    ) -> Result<Option<entities::playlist::Model>> {
        let modern = entities::playlist_platform_info::Entity::find()
            .filter(entities::playlist_platform_info::Column::Platform.eq(platform.as_str()))
            .filter(entities::playlist_platform_info::Column::PlatformId.eq(platform_id))
            .one(&self.db.conn)
            .await
            .wrap_err("Failed to fetch playlist platform info")?;

        if let Some(info) = modern {
            let playlist = entities::playlist::Entity::find_by_id(info.playlist_id)
                .one(&self.db.conn)
                .await
                .wrap_err("Failed to fetch playlist")?
                .ok_or_else(|| SyncError::NotFound(format!("playlist {}", info.playlist_id)))?;
            return Ok(Some(playlist));
        }

        let legacy = entities::playlist::Entity::find()
            .filter(entities::playlist::Column::SourcePlatform.eq(platform.as_str()))
            .filter(entities::playlist::Column::PlatformId.eq(platform_id))
            .one(&self.db.conn)
            .await
            .wrap_err("Failed to fetch playlist by legacy link")?;

        if let Some(ref playlist) = legacy {
            tracing::info!(
                "Playlist {} found via legacy inline link, backfilling modern link row",
                playlist.id
            );
            let link = entities::playlist_platform_info::ActiveModel {
                playlist_id: Set(playlist.id),
                platform: Set(platform.as_str().to_string()),
                platform_id: Set(platform_id.to_string()),
                ..entities::playlist_platform_info::ActiveModel::new()
            };
            link.insert(&self.db.conn)
                .await
                .wrap_err("Failed to backfill playlist platform info")?;
        }

        Ok(legacy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_db;

    fn spotify_track(id: &str, title: &str) -> PlatformTrack {
        PlatformTrack {
            platform: Platform::Spotify,
            id: id.into(),
            removal_id: None,
            title: title.into(),
            artist: "Artist".into(),
            duration_ms: Some(200_000),
            uri: Some(format!("spotify:track:{id}")),
            metadata: serde_json::json!({"album": "Album X"}),
        }
    }

    fn spotify_playlist(id: &str, name: &str) -> PlatformPlaylist {
        PlatformPlaylist {
            platform: Platform::Spotify,
            id: id.into(),
            name: name.into(),
            description: None,
            is_owner: true,
            is_public: false,
            track_count: 0,
            uri: None,
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_resolve_track_creates_once() {
        let db = test_db().await;
        let resolver = ResolverService::new(db.clone());

        let first = resolver.resolve_track(&spotify_track("t1", "Song")).await.unwrap();
        let second = resolver
            .resolve_track(&spotify_track("t1", "Song (Remastered)"))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.title, "Song (Remastered)");

        let tracks = entities::track::Entity::find().all(&db.conn).await.unwrap();
        assert_eq!(tracks.len(), 1);

        let infos = entities::track_platform_info::Entity::find()
            .all(&db.conn)
            .await
            .unwrap();
        assert_eq!(infos.len(), 1);
        assert!(infos[0].last_synced.is_some());
    }

    #[tokio::test]
    async fn test_resolve_track_distinct_per_platform() {
        let db = test_db().await;
        let resolver = ResolverService::new(db.clone());

        resolver.resolve_track(&spotify_track("t1", "Song")).await.unwrap();
        let mut yt = spotify_track("t1", "Song");
        yt.platform = Platform::Youtube;
        resolver.resolve_track(&yt).await.unwrap();

        // Same platform_id on different platforms is two different tracks
        let tracks = entities::track::Entity::find().all(&db.conn).await.unwrap();
        assert_eq!(tracks.len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_playlist_creates_and_links() {
        let db = test_db().await;
        let resolver = ResolverService::new(db.clone());

        let playlist = resolver
            .resolve_playlist(&spotify_playlist("pl1", "My Mix"), None)
            .await
            .unwrap();
        assert_eq!(playlist.name, "My Mix");

        let link = resolver
            .playlist_link(playlist.id, Platform::Spotify)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(link.platform_id, "pl1");

        // Ownership travels in the link metadata
        let metadata: serde_json::Value =
            serde_json::from_str(link.metadata.as_deref().unwrap()).unwrap();
        assert_eq!(metadata["is_owner"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn test_resolve_playlist_idempotent() {
        let db = test_db().await;
        let resolver = ResolverService::new(db.clone());

        let first = resolver
            .resolve_playlist(&spotify_playlist("pl1", "My Mix"), None)
            .await
            .unwrap();
        let second = resolver
            .resolve_playlist(&spotify_playlist("pl1", "My Mix"), None)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        let playlists = entities::playlist::Entity::find().all(&db.conn).await.unwrap();
        assert_eq!(playlists.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_playlist_legacy_fallback_backfills_link() {
        let db = test_db().await;
        let resolver = ResolverService::new(db.clone());

        // A playlist written before the link table existed
        let legacy = entities::playlist::ActiveModel {
            name: Set("Old Mix".into()),
            source_platform: Set(Some("spotify".into())),
            platform_id: Set(Some("pl1".into())),
            ..entities::playlist::ActiveModel::new()
        };
        let legacy = legacy.insert(&db.conn).await.unwrap();

        let resolved = resolver
            .resolve_playlist(&spotify_playlist("pl1", "Old Mix"), None)
            .await
            .unwrap();
        assert_eq!(resolved.id, legacy.id);

        // Modern link row now exists
        let link = resolver
            .playlist_link(legacy.id, Platform::Spotify)
            .await
            .unwrap();
        assert!(link.is_some());
    }

    #[tokio::test]
    async fn test_resolve_playlist_name_override() {
        let db = test_db().await;
        let resolver = ResolverService::new(db.clone());

        let playlist = resolver
            .resolve_playlist(&spotify_playlist("pl1", "Remote Name"), Some("Local Name"))
            .await
            .unwrap();
        assert_eq!(playlist.name, "Local Name");
    }
}
