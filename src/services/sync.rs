use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use color_eyre::eyre::{Result, WrapErr};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};

use crate::database::Database;
use crate::entities;
use crate::error::SyncError;
use crate::ports::platform::{Platform, PlatformClient, PlatformTrack};
use crate::services::playlist::PlaylistService;
use crate::services::resolver::ResolverService;
use crate::services::safety::{Operation, SafetyGuard};

/// The distinguished local playlist accumulating every track ever imported.
const COLLECTION_PLAYLIST_NAME: &str = "Collection";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// On the platform, not in the library: import candidate.
    PlatformAddition,
    /// Linked locally, gone from the platform: local removal candidate.
    PlatformRemoval,
    /// In the library, missing remotely: push candidate (personal only).
    LibraryAddition,
    /// On the platform, not in the library: remote removal candidate
    /// (personal only).
    LibraryRemoval,
}

/// One proposed, not-yet-applied membership change, individually selectable
/// by its per-diff `id`.
#[derive(Debug, Clone)]
pub struct TrackChange {
    pub id: usize,
    pub change_type: ChangeType,
    pub title: String,
    /// Local track id, when the track exists in the library.
    pub track_id: Option<i64>,
    /// Platform content id.
    pub platform_id: Option<String>,
    /// Membership-specific id required for remote removal where the platform
    /// distinguishes it from the content id.
    pub removal_id: Option<String>,
    /// Full canonical record, present for changes originating remotely.
    pub platform_track: Option<PlatformTrack>,
}

#[derive(Debug, Clone)]
pub struct SyncChanges {
    pub playlist_id: i64,
    pub platform: Platform,
    pub platform_playlist_id: String,
    /// Owned/writable remotely. Shared playlists never carry library_* changes.
    pub is_personal: bool,
    pub changes: Vec<TrackChange>,
}

impl SyncChanges {
    pub fn count_of(&self, change_type: ChangeType) -> usize {
        self.changes
            .iter()
            .filter(|c| c.change_type == change_type)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Outcome of a best-effort batch apply. Not atomic: failed changes land in
/// `errors` and the rest proceed.
#[derive(Debug, Default)]
pub struct SyncResult {
    pub applied: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Which direction(s) of a diff `sync_playlist` considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOperation {
    /// Platform -> library only.
    Pull,
    /// Library -> platform only.
    Push,
    /// Converge both sides on the union of their memberships.
    TwoWay,
}

impl SyncOperation {
    /// Which change classes an apply-all run executes.
    ///
    /// On a personal playlist every difference surfaces as a mirrored pair
    /// (a platform addition twins a library removal, and vice versa), so a
    /// two-way run takes only the addition of each pair; applying both sides
    /// would swap the memberships instead of converging them.
    fn applies(&self, change_type: ChangeType) -> bool {
        match self {
            SyncOperation::Pull => matches!(
                change_type,
                ChangeType::PlatformAddition | ChangeType::PlatformRemoval
            ),
            SyncOperation::Push => matches!(
                change_type,
                ChangeType::LibraryAddition | ChangeType::LibraryRemoval
            ),
            SyncOperation::TwoWay => matches!(
                change_type,
                ChangeType::PlatformAddition | ChangeType::LibraryAddition
            ),
        }
    }
}

#[derive(Debug)]
pub struct SyncSummary {
    pub additions: usize,
    pub removals: usize,
    /// Present when changes were applied rather than just counted.
    pub result: Option<SyncResult>,
}

#[derive(Debug)]
pub struct ImportReport {
    pub playlist: entities::playlist::Model,
    pub tracks: Vec<entities::track::Model>,
    pub added_to_playlist: usize,
    pub added_to_collection: usize,
}

/// Drives import, export, preview and selective apply against one platform
/// client. Remote calls are serial; no internal retry.
pub struct SyncService<C: PlatformClient> {
    db: Arc<Database>,
    client: C,
    playlists: PlaylistService,
    resolver: ResolverService,
    guard: Option<Arc<SafetyGuard>>,
}

impl<C: PlatformClient> SyncService<C> {
    pub fn new(db: Arc<Database>, client: C) -> Self {
        Self {
            playlists: PlaylistService::new(db.clone()),
            resolver: ResolverService::new(db.clone()),
            db,
            client,
            guard: None,
        }
    }

    pub fn with_guard(mut self, guard: Arc<SafetyGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    async fn ensure_authenticated(&self) -> Result<()> {
        if !self.client.is_authenticated().await {
            return Err(SyncError::Authentication.into());
        }
        Ok(())
    }

    fn verify(&self, name: &str, operation: Operation) -> Result<(), SyncError> {
        match &self.guard {
            Some(guard) => guard.verify_test_playlist(name, operation),
            None => Ok(()),
        }
    }

    fn dry_run(&self) -> bool {
        self.guard.as_ref().map(|g| g.dry_run()).unwrap_or(false)
    }

    /// Fetch a platform playlist and fold it into the library: resolve or
    /// create the local playlist, resolve every track, append each to the
    /// target playlist and the Collection (skipping whatever is already
    /// present), and stamp the platform link.
    ///
    /// Fails with an authentication error before anything is written.
    pub async fn import_playlist(
        &self,
        platform_playlist_id: &str,
        target_name: Option<&str>,
        target_playlist_id: Option<i64>,
    ) -> Result<ImportReport> {
        self.ensure_authenticated().await?;

        let (remote_tracks, remote_playlist) = self
            .client
            .import_playlist_to_local(platform_playlist_id)
            .await?;

        tracing::info!(
            "Importing {} playlist '{}' ({} tracks)",
            remote_playlist.platform,
            remote_playlist.name,
            remote_tracks.len()
        );

        let playlist = match target_playlist_id {
            Some(id) => {
                let playlist = self.playlists.get(id).await?;
                self.resolver.link_playlist(playlist.id, &remote_playlist).await?;
                playlist
            }
            None => {
                self.resolver
                    .resolve_playlist(&remote_playlist, target_name)
                    .await?
            }
        };

        let collection_id = self.find_collection_playlist_id().await?;

        let mut tracks = Vec::with_capacity(remote_tracks.len());
        let mut added_to_playlist = 0;
        let mut added_to_collection = 0;

        for record in &remote_tracks {
            let track = self.resolver.resolve_track(record).await?;

            if self.track_in_playlist(playlist.id, track.id).await? {
                tracing::debug!("Track {} already in playlist {}, skipping", track.id, playlist.id);
            } else {
                self.playlists.add_track(playlist.id, track.id, None).await?;
                added_to_playlist += 1;
            }

            if self.add_to_collection(collection_id, track.id).await? {
                added_to_collection += 1;
            }

            tracks.push(track);
        }

        let mut playlist_model: entities::playlist::ActiveModel = playlist.into();
        playlist_model.last_synced = Set(Some(Utc::now()));
        let playlist = playlist_model
            .update(&self.db.conn)
            .await
            .wrap_err("Failed to stamp playlist sync time")?;

        tracing::info!(
            "Imported playlist '{}': {} tracks added, {} new in Collection",
            playlist.name,
            added_to_playlist,
            added_to_collection
        );

        Ok(ImportReport {
            playlist,
            tracks,
            added_to_playlist,
            added_to_collection,
        })
    }

    /// Push a local playlist's linked tracks to the platform. Tracks without
    /// a platform id for this platform are skipped; no cross-platform
    /// matching happens here. Returns the remote playlist id.
    pub async fn export_playlist(
        &self,
        local_playlist_id: i64,
        platform_playlist_id: Option<&str>,
        platform_playlist_name: Option<&str>,
    ) -> Result<String> {
        self.ensure_authenticated().await?;

        let playlist = self.playlists.get(local_playlist_id).await?;
        let name = platform_playlist_name
            .unwrap_or(&playlist.name)
            .to_string();

        let tracks = self.playlists.get_playlist_tracks(local_playlist_id).await?;

        let mut track_ids = Vec::new();
        let mut skipped = 0;
        for track in &tracks {
            match self
                .resolver
                .track_link(track.id, self.client.platform())
                .await?
            {
                Some(link) => track_ids.push(link.platform_id),
                None => {
                    tracing::debug!(
                        "Track {} ('{}') has no {} id, skipping",
                        track.id,
                        track.title,
                        self.client.platform()
                    );
                    skipped += 1;
                }
            }
        }

        let operation = if platform_playlist_id.is_some() {
            Operation::Modify
        } else {
            Operation::Create
        };
        self.verify(&name, operation)?;

        if self.dry_run() {
            tracing::info!(
                "Dry run: would export {} tracks to '{}' ({} skipped)",
                track_ids.len(),
                name,
                skipped
            );
            return Ok(platform_playlist_id.unwrap_or("dry-run").to_string());
        }

        let remote_id = self
            .client
            .export_tracks_to_playlist(&name, &track_ids, platform_playlist_id.map(String::from))
            .await?;

        // Persist the link so future diffs see this playlist
        let (_, remote_playlist) = self.client.import_playlist_to_local(&remote_id).await?;
        self.resolver
            .link_playlist(local_playlist_id, &remote_playlist)
            .await?;

        let mut playlist_model: entities::playlist::ActiveModel = playlist.into();
        playlist_model.last_synced = Set(Some(Utc::now()));
        playlist_model
            .update(&self.db.conn)
            .await
            .wrap_err("Failed to stamp playlist sync time")?;

        tracing::info!(
            "Exported {} tracks to {} playlist '{}' ({} without a platform id skipped)",
            track_ids.len(),
            self.client.platform(),
            name,
            skipped
        );

        Ok(remote_id)
    }

    /// Compute the set-difference changeset between the platform's current
    /// membership and the library's linked membership. Read-only; running it
    /// twice with no mutation in between yields identical changesets.
    pub async fn get_sync_changes(&self, local_playlist_id: i64) -> Result<SyncChanges> {
        self.ensure_authenticated().await?;

        let playlist = self.playlists.get(local_playlist_id).await?;
        let (remote_playlist_id, is_personal) = self.remote_link(&playlist).await?;

        let remote_tracks = self.client.get_playlist_tracks(&remote_playlist_id).await?;
        let remote_ids: HashSet<&str> = remote_tracks.iter().map(|t| t.id.as_str()).collect();

        // Local membership restricted to tracks linked on this platform;
        // unlinked local tracks are invisible to the diff
        let memberships = self.playlists.get_memberships(local_playlist_id).await?;
        let mut local_links: Vec<(i64, String)> = Vec::new();
        for membership in &memberships {
            if let Some(link) = self
                .resolver
                .track_link(membership.track_id, self.client.platform())
                .await?
            {
                local_links.push((membership.track_id, link.platform_id));
            }
        }
        let local_ids: HashSet<&str> = local_links.iter().map(|(_, id)| id.as_str()).collect();

        let track_titles: HashMap<i64, String> = entities::track::Entity::find()
            .filter(
                entities::track::Column::Id
                    .is_in(local_links.iter().map(|(id, _)| *id).collect::<Vec<_>>()),
            )
            .all(&self.db.conn)
            .await
            .wrap_err("Failed to fetch tracks")?
            .into_iter()
            .map(|t| (t.id, t.title))
            .collect();

        let mut changes = Vec::new();
        let mut next_id = 0;
        let mut push = |change_type, title: &str, track_id, platform_id, removal_id, record| {
            changes.push(TrackChange {
                id: next_id,
                change_type,
                title: title.to_string(),
                track_id,
                platform_id,
                removal_id,
                platform_track: record,
            });
            next_id += 1;
        };

        for remote in &remote_tracks {
            if !local_ids.contains(remote.id.as_str()) {
                push(
                    ChangeType::PlatformAddition,
                    &remote.title,
                    None,
                    Some(remote.id.clone()),
                    remote.removal_id.clone(),
                    Some(remote.clone()),
                );
            }
        }

        for (track_id, platform_id) in &local_links {
            if !remote_ids.contains(platform_id.as_str()) {
                let title = track_titles
                    .get(track_id)
                    .cloned()
                    .unwrap_or_else(|| format!("track {track_id}"));
                push(
                    ChangeType::PlatformRemoval,
                    &title,
                    Some(*track_id),
                    Some(platform_id.clone()),
                    None,
                    None,
                );
            }
        }

        if is_personal {
            // Reverse direction: what the library would do to the platform
            for (track_id, platform_id) in &local_links {
                if !remote_ids.contains(platform_id.as_str()) {
                    let title = track_titles
                        .get(track_id)
                        .cloned()
                        .unwrap_or_else(|| format!("track {track_id}"));
                    push(
                        ChangeType::LibraryAddition,
                        &title,
                        Some(*track_id),
                        Some(platform_id.clone()),
                        None,
                        None,
                    );
                }
            }
            for remote in &remote_tracks {
                if !local_ids.contains(remote.id.as_str()) {
                    push(
                        ChangeType::LibraryRemoval,
                        &remote.title,
                        None,
                        Some(remote.id.clone()),
                        remote.removal_id.clone(),
                        Some(remote.clone()),
                    );
                }
            }
        }

        Ok(SyncChanges {
            playlist_id: local_playlist_id,
            platform: self.client.platform(),
            platform_playlist_id: remote_playlist_id,
            is_personal,
            changes,
        })
    }

    /// Apply the accepted subset of a freshly computed diff. Best-effort: a
    /// failing change is recorded and processing continues.
    pub async fn apply_sync_changes(
        &self,
        local_playlist_id: i64,
        selected: &HashMap<usize, bool>,
    ) -> Result<SyncResult> {
        let changes = self.get_sync_changes(local_playlist_id).await?;
        self.apply_changes(&changes, |change| {
            selected.get(&change.id).copied().unwrap_or(false)
        })
        .await
    }

    /// Convenience wrapper around diff + apply. With `apply_all_changes`
    /// unset it only reports the add/remove counts for the chosen direction.
    pub async fn sync_playlist(
        &self,
        local_playlist_id: i64,
        operation: SyncOperation,
        apply_all_changes: bool,
    ) -> Result<SyncSummary> {
        let changes = self.get_sync_changes(local_playlist_id).await?;

        let additions = changes.count_of(ChangeType::PlatformAddition)
            + changes.count_of(ChangeType::LibraryAddition);
        let removals = changes.count_of(ChangeType::PlatformRemoval)
            + changes.count_of(ChangeType::LibraryRemoval);

        let result = if apply_all_changes {
            Some(
                self.apply_changes(&changes, |change| operation.applies(change.change_type))
                    .await?,
            )
        } else {
            None
        };

        Ok(SyncSummary {
            additions,
            removals,
            result,
        })
    }

    async fn apply_changes(
        &self,
        changes: &SyncChanges,
        accept: impl Fn(&TrackChange) -> bool,
    ) -> Result<SyncResult> {
        let playlist = self.playlists.get(changes.playlist_id).await?;
        let mut result = SyncResult::default();

        for change in &changes.changes {
            if !accept(change) {
                result.skipped += 1;
                continue;
            }

            match self.apply_one(&playlist, changes, change).await {
                Ok(true) => result.applied += 1,
                Ok(false) => result.skipped += 1,
                Err(e) => {
                    tracing::error!("Failed to apply change '{}': {e:#}", change.title);
                    result.errors.push(format!("{}: {e:#}", change.title));
                }
            }
        }

        tracing::info!(
            "Applied {} changes to playlist '{}' ({} skipped, {} failed)",
            result.applied,
            playlist.name,
            result.skipped,
            result.errors.len()
        );

        Ok(result)
    }

    /// Returns Ok(false) when the change turned out to be moot (already
    /// applied, or suppressed by dry run).
    async fn apply_one(
        &self,
        playlist: &entities::playlist::Model,
        changes: &SyncChanges,
        change: &TrackChange,
    ) -> Result<bool> {
        match change.change_type {
            ChangeType::PlatformAddition => {
                let record = change
                    .platform_track
                    .as_ref()
                    .ok_or_else(|| SyncError::NotFound("platform record for change".into()))?;
                if self.dry_run() {
                    tracing::info!("Dry run: would import '{}'", change.title);
                    return Ok(false);
                }
                let track = self.resolver.resolve_track(record).await?;
                if self.track_in_playlist(playlist.id, track.id).await? {
                    log::warn!(
                        "Track {} already in playlist {}, nothing to add",
                        track.id,
                        playlist.id
                    );
                    return Ok(false);
                }
                self.playlists.add_track(playlist.id, track.id, None).await?;
                let collection_id = self.find_collection_playlist_id().await?;
                self.add_to_collection(collection_id, track.id).await?;
                Ok(true)
            }
            ChangeType::PlatformRemoval => {
                let track_id = change
                    .track_id
                    .ok_or_else(|| SyncError::NotFound("local track for change".into()))?;
                if self.dry_run() {
                    tracing::info!("Dry run: would remove '{}' locally", change.title);
                    return Ok(false);
                }
                let removed = self.playlists.remove_track(playlist.id, track_id).await?;
                if !removed {
                    log::warn!(
                        "Track {} already absent from playlist {}, nothing to remove",
                        track_id,
                        playlist.id
                    );
                }
                Ok(removed)
            }
            ChangeType::LibraryAddition => {
                let platform_id = change
                    .platform_id
                    .clone()
                    .ok_or_else(|| SyncError::NotFound("platform id for change".into()))?;
                self.verify(&playlist.name, Operation::Modify)?;
                if self.dry_run() {
                    tracing::info!("Dry run: would push '{}' to the platform", change.title);
                    return Ok(false);
                }
                self.client
                    .add_tracks_to_playlist(&changes.platform_playlist_id, &[platform_id])
                    .await?;
                if let Some(track_id) = change.track_id {
                    self.touch_track_link(track_id).await?;
                }
                Ok(true)
            }
            ChangeType::LibraryRemoval => {
                // Prefer the membership-specific id where the platform has one
                let removal_id = change
                    .removal_id
                    .clone()
                    .or_else(|| change.platform_id.clone())
                    .ok_or_else(|| SyncError::NotFound("removal id for change".into()))?;
                self.verify(&playlist.name, Operation::Modify)?;
                if self.dry_run() {
                    tracing::info!("Dry run: would remove '{}' remotely", change.title);
                    return Ok(false);
                }
                self.client
                    .remove_tracks_from_playlist(&changes.platform_playlist_id, &[removal_id])
                    .await?;
                Ok(true)
            }
        }
    }

    async fn touch_track_link(&self, track_id: i64) -> Result<()> {
        if let Some(link) = self
            .resolver
            .track_link(track_id, self.client.platform())
            .await?
        {
            let mut model: entities::track_platform_info::ActiveModel = link.into();
            model.last_synced = Set(Some(Utc::now()));
            model
                .update(&self.db.conn)
                .await
                .wrap_err("Failed to stamp track link")?;
        }
        Ok(())
    }

    /// Remote id + personal flag for a playlist, modern link first, legacy
    /// inline columns second. Ownership is read from the link metadata;
    /// unknown ownership is treated as shared (import-only).
    async fn remote_link(&self, playlist: &entities::playlist::Model) -> Result<(String, bool)> {
        if let Some(link) = self
            .resolver
            .playlist_link(playlist.id, self.client.platform())
            .await?
        {
            let is_personal = link
                .metadata
                .as_deref()
                .and_then(|m| serde_json::from_str::<serde_json::Value>(m).ok())
                .and_then(|m| m.get("is_owner").and_then(|v| v.as_bool()))
                .unwrap_or(false);
            return Ok((link.platform_id, is_personal));
        }

        if playlist.source_platform.as_deref() == Some(self.client.platform().as_str()) {
            if let Some(ref platform_id) = playlist.platform_id {
                return Ok((platform_id.clone(), false));
            }
        }

        Err(SyncError::NotFound(format!(
            "{} link for playlist {}",
            self.client.platform(),
            playlist.id
        ))
        .into())
    }

    /// Locate the Collection playlist, creating it lazily.
    ///
    /// The membership check-then-add around it is not transactional; the
    /// design assumes a single sync execution per database at a time.
    pub async fn find_collection_playlist_id(&self) -> Result<i64> {
        let existing = entities::playlist::Entity::find()
            .filter(entities::playlist::Column::Name.eq(COLLECTION_PLAYLIST_NAME))
            .filter(entities::playlist::Column::IsLocal.eq(true))
            .one(&self.db.conn)
            .await
            .wrap_err("Failed to fetch Collection playlist")?;

        if let Some(playlist) = existing {
            return Ok(playlist.id);
        }

        let playlist = self
            .playlists
            .create(COLLECTION_PLAYLIST_NAME.to_string(), None)
            .await?;
        tracing::info!("Created Collection playlist ({})", playlist.id);
        Ok(playlist.id)
    }

    async fn track_in_playlist(&self, playlist_id: i64, track_id: i64) -> Result<bool> {
        Ok(
            entities::playlist_track::Entity::find_by_id((playlist_id, track_id))
                .one(&self.db.conn)
                .await
                .wrap_err("Failed to check playlist membership")?
                .is_some(),
        )
    }

    /// Append to the Collection unless already present. Returns whether a
    /// row was added.
    async fn add_to_collection(&self, collection_id: i64, track_id: i64) -> Result<bool> {
        if self.track_in_playlist(collection_id, track_id).await? {
            log::debug!("Track {track_id} already in Collection, skipping");
            return Ok(false);
        }
        self.playlists.add_track(collection_id, track_id, None).await?;
        Ok(true)
    }
}
