use std::sync::Arc;

use color_eyre::eyre::{Result, WrapErr};
use sea_orm::sea_query::{Expr, ExprTrait};
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};

use crate::database::Database;
use crate::entities;
use crate::error::SyncError;

/// Ordered playlist membership store. Every mutation leaves positions as a
/// dense 0-based sequence per playlist; multi-row shifts run inside a single
/// transaction so no reader observes a duplicated or missing position.
pub struct PlaylistService {
    db: Arc<Database>,
}

impl PlaylistService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        name: String,
        description: Option<String>,
    ) -> Result<entities::playlist::Model> {
        let playlist = entities::playlist::ActiveModel {
            name: Set(name),
            description: Set(description),
            ..entities::playlist::ActiveModel::new()
        };

        playlist
            .insert(&self.db.conn)
            .await
            .wrap_err("Failed to create playlist")
    }

    pub async fn get(&self, playlist_id: i64) -> Result<entities::playlist::Model> {
        entities::playlist::Entity::find_by_id(playlist_id)
            .one(&self.db.conn)
            .await
            .wrap_err("Failed to find playlist")?
            .ok_or_else(|| SyncError::NotFound(format!("playlist {playlist_id}")).into())
    }

    /// List playlists with their track counts.
    pub async fn list(&self) -> Result<Vec<(entities::playlist::Model, u64)>> {
        let playlists = entities::playlist::Entity::find()
            .order_by_asc(entities::playlist::Column::Name)
            .all(&self.db.conn)
            .await
            .wrap_err("Failed to fetch playlists")?;

        let mut items = Vec::new();
        for playlist in playlists {
            let track_count = entities::playlist_track::Entity::find()
                .filter(entities::playlist_track::Column::PlaylistId.eq(playlist.id))
                .count(&self.db.conn)
                .await
                .wrap_err("Failed to count playlist tracks")?;
            items.push((playlist, track_count));
        }

        Ok(items)
    }

    /// Append a track, or insert it at `position` shifting later rows up.
    ///
    /// No duplicate check happens at this layer; callers that need set
    /// semantics (the Collection) check membership first.
    pub async fn add_track(
        &self,
        playlist_id: i64,
        track_id: i64,
        position: Option<i32>,
    ) -> Result<()> {
        self.get(playlist_id).await?;

        entities::track::Entity::find_by_id(track_id)
            .one(&self.db.conn)
            .await
            .wrap_err("Failed to find track")?
            .ok_or_else(|| SyncError::NotFound(format!("track {track_id}")))?;

        let count = entities::playlist_track::Entity::find()
            .filter(entities::playlist_track::Column::PlaylistId.eq(playlist_id))
            .count(&self.db.conn)
            .await
            .wrap_err("Failed to count playlist tracks")? as i32;

        let position = position.unwrap_or(count).clamp(0, count);

        let txn = self
            .db
            .conn
            .begin()
            .await
            .wrap_err("Failed to begin transaction")?;

        if position < count {
            // Make room: shift everything at or after the insertion point up
            entities::playlist_track::Entity::update_many()
                .col_expr(
                    entities::playlist_track::Column::Position,
                    Expr::col(entities::playlist_track::Column::Position).add(1),
                )
                .filter(entities::playlist_track::Column::PlaylistId.eq(playlist_id))
                .filter(entities::playlist_track::Column::Position.gte(position))
                .exec(&txn)
                .await
                .wrap_err("Failed to shift playlist positions")?;
        }

        let playlist_track = entities::playlist_track::ActiveModel {
            playlist_id: Set(playlist_id),
            track_id: Set(track_id),
            position: Set(position),
            ..entities::playlist_track::ActiveModel::new()
        };
        playlist_track
            .insert(&txn)
            .await
            .wrap_err("Failed to add track to playlist")?;

        txn.commit().await.wrap_err("Failed to commit transaction")?;

        Ok(())
    }

    /// Remove a track and close the position gap. Returns false if the track
    /// was not in the playlist.
    pub async fn remove_track(&self, playlist_id: i64, track_id: i64) -> Result<bool> {
        let existing = entities::playlist_track::Entity::find_by_id((playlist_id, track_id))
            .one(&self.db.conn)
            .await
            .wrap_err("Failed to find playlist track")?;

        let Some(existing) = existing else {
            return Ok(false);
        };
        let removed_position = existing.position;

        let txn = self
            .db
            .conn
            .begin()
            .await
            .wrap_err("Failed to begin transaction")?;

        entities::playlist_track::Entity::delete_by_id((playlist_id, track_id))
            .exec(&txn)
            .await
            .wrap_err("Failed to remove track from playlist")?;

        entities::playlist_track::Entity::update_many()
            .col_expr(
                entities::playlist_track::Column::Position,
                Expr::col(entities::playlist_track::Column::Position).sub(1),
            )
            .filter(entities::playlist_track::Column::PlaylistId.eq(playlist_id))
            .filter(entities::playlist_track::Column::Position.gt(removed_position))
            .exec(&txn)
            .await
            .wrap_err("Failed to shift playlist positions")?;

        txn.commit().await.wrap_err("Failed to commit transaction")?;

        Ok(true)
    }

    /// Move a track to `new_position`, shifting the rows between its old and
    /// new slots by one. No-op when the position is unchanged.
    pub async fn reorder_track(
        &self,
        playlist_id: i64,
        track_id: i64,
        new_position: i32,
    ) -> Result<()> {
        let existing = entities::playlist_track::Entity::find_by_id((playlist_id, track_id))
            .one(&self.db.conn)
            .await
            .wrap_err("Failed to find playlist track")?
            .ok_or_else(|| {
                SyncError::NotFound(format!("track {track_id} in playlist {playlist_id}"))
            })?;

        let count = entities::playlist_track::Entity::find()
            .filter(entities::playlist_track::Column::PlaylistId.eq(playlist_id))
            .count(&self.db.conn)
            .await
            .wrap_err("Failed to count playlist tracks")? as i32;

        let old_position = existing.position;
        let new_position = new_position.clamp(0, count - 1);

        if new_position == old_position {
            return Ok(());
        }

        let txn = self
            .db
            .conn
            .begin()
            .await
            .wrap_err("Failed to begin transaction")?;

        if new_position < old_position {
            // Moving up: rows in [new, old) slide down one slot
            entities::playlist_track::Entity::update_many()
                .col_expr(
                    entities::playlist_track::Column::Position,
                    Expr::col(entities::playlist_track::Column::Position).add(1),
                )
                .filter(entities::playlist_track::Column::PlaylistId.eq(playlist_id))
                .filter(entities::playlist_track::Column::Position.gte(new_position))
                .filter(entities::playlist_track::Column::Position.lt(old_position))
                .exec(&txn)
                .await
                .wrap_err("Failed to shift playlist positions")?;
        } else {
            // Moving down: rows in (old, new] slide up one slot
            entities::playlist_track::Entity::update_many()
                .col_expr(
                    entities::playlist_track::Column::Position,
                    Expr::col(entities::playlist_track::Column::Position).sub(1),
                )
                .filter(entities::playlist_track::Column::PlaylistId.eq(playlist_id))
                .filter(entities::playlist_track::Column::Position.gt(old_position))
                .filter(entities::playlist_track::Column::Position.lte(new_position))
                .exec(&txn)
                .await
                .wrap_err("Failed to shift playlist positions")?;
        }

        let moved = entities::playlist_track::ActiveModel {
            playlist_id: Set(playlist_id),
            track_id: Set(track_id),
            position: Set(new_position),
            added_at: NotSet,
        };
        moved
            .update(&txn)
            .await
            .wrap_err("Failed to update track position")?;

        txn.commit().await.wrap_err("Failed to commit transaction")?;

        Ok(())
    }

    /// Tracks of a playlist ordered ascending by position.
    pub async fn get_playlist_tracks(
        &self,
        playlist_id: i64,
    ) -> Result<Vec<entities::track::Model>> {
        let memberships = self.get_memberships(playlist_id).await?;

        let track_ids: Vec<i64> = memberships.iter().map(|pt| pt.track_id).collect();
        let tracks = entities::track::Entity::find()
            .filter(entities::track::Column::Id.is_in(track_ids.clone()))
            .all(&self.db.conn)
            .await
            .wrap_err("Failed to fetch tracks")?;

        let mut by_id: std::collections::HashMap<i64, entities::track::Model> =
            tracks.into_iter().map(|t| (t.id, t)).collect();

        Ok(track_ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Membership rows of a playlist ordered ascending by position.
    pub async fn get_memberships(
        &self,
        playlist_id: i64,
    ) -> Result<Vec<entities::playlist_track::Model>> {
        entities::playlist_track::Entity::find()
            .filter(entities::playlist_track::Column::PlaylistId.eq(playlist_id))
            .order_by_asc(entities::playlist_track::Column::Position)
            .all(&self.db.conn)
            .await
            .wrap_err("Failed to fetch playlist tracks")
    }

    /// Bulk delete of a playlist's membership, used before a full re-import.
    pub async fn clear_tracks(&self, playlist_id: i64) -> Result<u64> {
        let result = entities::playlist_track::Entity::delete_many()
            .filter(entities::playlist_track::Column::PlaylistId.eq(playlist_id))
            .exec(&self.db.conn)
            .await
            .wrap_err("Failed to clear playlist tracks")?;

        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_db;

    async fn insert_track(db: &Database, title: &str) -> entities::track::Model {
        let track = entities::track::ActiveModel {
            title: Set(title.into()),
            artist: Set("Artist".into()),
            ..entities::track::ActiveModel::new()
        };
        track.insert(&db.conn).await.unwrap()
    }

    async fn positions(db: &Database, playlist_id: i64) -> Vec<(i64, i32)> {
        entities::playlist_track::Entity::find()
            .filter(entities::playlist_track::Column::PlaylistId.eq(playlist_id))
            .order_by_asc(entities::playlist_track::Column::Position)
            .all(&db.conn)
            .await
            .unwrap()
            .into_iter()
            .map(|pt| (pt.track_id, pt.position))
            .collect()
    }

    async fn setup_playlist(
        db: &Arc<Database>,
        service: &PlaylistService,
        n: usize,
    ) -> (i64, Vec<i64>) {
        let playlist = service.create("Test".into(), None).await.unwrap();
        let mut track_ids = Vec::new();
        for i in 0..n {
            let track = insert_track(db, &format!("Track {i}")).await;
            service.add_track(playlist.id, track.id, None).await.unwrap();
            track_ids.push(track.id);
        }
        (playlist.id, track_ids)
    }

    #[tokio::test]
    async fn test_add_track_appends_at_end() {
        let db = test_db().await;
        let service = PlaylistService::new(db.clone());
        let (playlist_id, track_ids) = setup_playlist(&db, &service, 3).await;

        let got = positions(&db, playlist_id).await;
        assert_eq!(
            got,
            vec![(track_ids[0], 0), (track_ids[1], 1), (track_ids[2], 2)]
        );
    }

    #[tokio::test]
    async fn test_add_track_at_position_shifts_later_rows() {
        let db = test_db().await;
        let service = PlaylistService::new(db.clone());
        let (playlist_id, track_ids) = setup_playlist(&db, &service, 3).await;

        let new_track = insert_track(&db, "Inserted").await;
        service
            .add_track(playlist_id, new_track.id, Some(1))
            .await
            .unwrap();

        let got = positions(&db, playlist_id).await;
        assert_eq!(
            got,
            vec![
                (track_ids[0], 0),
                (new_track.id, 1),
                (track_ids[1], 2),
                (track_ids[2], 3)
            ]
        );
    }

    #[tokio::test]
    async fn test_add_track_missing_playlist() {
        let db = test_db().await;
        let service = PlaylistService::new(db.clone());
        let track = insert_track(&db, "Track").await;

        let err = service.add_track(999, track.id, None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_track_closes_gap() {
        // Track at position 1 of [0,1,2,3]: remaining rows end at [0,1,2]
        let db = test_db().await;
        let service = PlaylistService::new(db.clone());
        let (playlist_id, track_ids) = setup_playlist(&db, &service, 4).await;

        let removed = service.remove_track(playlist_id, track_ids[1]).await.unwrap();
        assert!(removed);

        let got = positions(&db, playlist_id).await;
        assert_eq!(
            got,
            vec![(track_ids[0], 0), (track_ids[2], 1), (track_ids[3], 2)]
        );
    }

    #[tokio::test]
    async fn test_remove_track_absent_returns_false() {
        let db = test_db().await;
        let service = PlaylistService::new(db.clone());
        let (playlist_id, _) = setup_playlist(&db, &service, 1).await;

        let removed = service.remove_track(playlist_id, 999).await.unwrap();
        assert!(!removed);
    }

    #[tokio::test]
    async fn test_reorder_track_to_front() {
        // Track at position 3 of [0..=4] moved to 0: previous 0,1,2 shift to
        // 1,2,3 and the position set stays {0,1,2,3,4}
        let db = test_db().await;
        let service = PlaylistService::new(db.clone());
        let (playlist_id, track_ids) = setup_playlist(&db, &service, 5).await;

        service
            .reorder_track(playlist_id, track_ids[3], 0)
            .await
            .unwrap();

        let got = positions(&db, playlist_id).await;
        assert_eq!(
            got,
            vec![
                (track_ids[3], 0),
                (track_ids[0], 1),
                (track_ids[1], 2),
                (track_ids[2], 3),
                (track_ids[4], 4)
            ]
        );
    }

    #[tokio::test]
    async fn test_reorder_track_down() {
        let db = test_db().await;
        let service = PlaylistService::new(db.clone());
        let (playlist_id, track_ids) = setup_playlist(&db, &service, 4).await;

        service
            .reorder_track(playlist_id, track_ids[0], 2)
            .await
            .unwrap();

        let got = positions(&db, playlist_id).await;
        assert_eq!(
            got,
            vec![
                (track_ids[1], 0),
                (track_ids[2], 1),
                (track_ids[0], 2),
                (track_ids[3], 3)
            ]
        );
    }

    #[tokio::test]
    async fn test_reorder_same_position_is_noop() {
        let db = test_db().await;
        let service = PlaylistService::new(db.clone());
        let (playlist_id, track_ids) = setup_playlist(&db, &service, 3).await;

        service
            .reorder_track(playlist_id, track_ids[1], 1)
            .await
            .unwrap();

        let got = positions(&db, playlist_id).await;
        assert_eq!(
            got,
            vec![(track_ids[0], 0), (track_ids[1], 1), (track_ids[2], 2)]
        );
    }

    #[tokio::test]
    async fn test_positions_stay_contiguous_after_mixed_operations() {
        let db = test_db().await;
        let service = PlaylistService::new(db.clone());
        let (playlist_id, track_ids) = setup_playlist(&db, &service, 6).await;

        service.remove_track(playlist_id, track_ids[2]).await.unwrap();
        service
            .reorder_track(playlist_id, track_ids[5], 0)
            .await
            .unwrap();
        let extra = insert_track(&db, "Extra").await;
        service
            .add_track(playlist_id, extra.id, Some(3))
            .await
            .unwrap();
        service.remove_track(playlist_id, track_ids[0]).await.unwrap();

        let got: Vec<i32> = positions(&db, playlist_id)
            .await
            .into_iter()
            .map(|(_, p)| p)
            .collect();
        assert_eq!(got, (0..5).collect::<Vec<i32>>());
    }

    #[tokio::test]
    async fn test_get_playlist_tracks_ordered() {
        let db = test_db().await;
        let service = PlaylistService::new(db.clone());
        let (playlist_id, track_ids) = setup_playlist(&db, &service, 3).await;

        service
            .reorder_track(playlist_id, track_ids[2], 0)
            .await
            .unwrap();

        let tracks = service.get_playlist_tracks(playlist_id).await.unwrap();
        let got: Vec<i64> = tracks.iter().map(|t| t.id).collect();
        assert_eq!(got, vec![track_ids[2], track_ids[0], track_ids[1]]);
    }

    #[tokio::test]
    async fn test_clear_tracks() {
        let db = test_db().await;
        let service = PlaylistService::new(db.clone());
        let (playlist_id, _) = setup_playlist(&db, &service, 3).await;

        let cleared = service.clear_tracks(playlist_id).await.unwrap();
        assert_eq!(cleared, 3);
        assert!(positions(&db, playlist_id).await.is_empty());
    }
}
