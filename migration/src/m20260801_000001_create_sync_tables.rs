use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Library tracks
        manager
            .create_table(
                Table::create()
                    .table("tracks")
                    .if_not_exists()
                    .col(
                        ColumnDef::new("id")
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new("title").string().not_null())
                    .col(ColumnDef::new("artist").string().not_null())
                    .col(ColumnDef::new("duration_ms").integer())
                    .col(ColumnDef::new("file_path").string())
                    .col(ColumnDef::new("created_at").timestamp().not_null())
                    .col(ColumnDef::new("updated_at").timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        // Per-platform track linkage
        manager
            .create_table(
                Table::create()
                    .table("track_platform_info")
                    .if_not_exists()
                    .col(
                        ColumnDef::new("id")
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new("track_id").big_integer().not_null())
                    .col(ColumnDef::new("platform").string().not_null())
                    .col(ColumnDef::new("platform_id").string().not_null())
                    .col(ColumnDef::new("uri").string())
                    .col(ColumnDef::new("metadata").string())
                    .col(ColumnDef::new("last_synced").timestamp())
                    .col(
                        ColumnDef::new("needs_update")
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new("created_at").timestamp().not_null())
                    .col(ColumnDef::new("updated_at").timestamp().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_track_platform_info_track_id")
                            .from("track_platform_info", "track_id")
                            .to("tracks", "id")
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_track_platform_info_track_platform")
                    .table("track_platform_info")
                    .col("track_id")
                    .col("platform")
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_track_platform_info_platform_id")
                    .table("track_platform_info")
                    .col("platform")
                    .col("platform_id")
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Playlists, with legacy inline platform columns kept for
        // databases written before playlist_platform_info existed
        manager
            .create_table(
                Table::create()
                    .table("playlists")
                    .if_not_exists()
                    .col(
                        ColumnDef::new("id")
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new("name").string().not_null())
                    .col(ColumnDef::new("description").string())
                    .col(
                        ColumnDef::new("is_local")
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new("source_platform").string())
                    .col(ColumnDef::new("platform_id").string())
                    .col(ColumnDef::new("parent_id").big_integer())
                    .col(
                        ColumnDef::new("sync_enabled")
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new("last_synced").timestamp())
                    .col(ColumnDef::new("created_at").timestamp().not_null())
                    .col(ColumnDef::new("updated_at").timestamp().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_playlists_parent_id")
                            .from("playlists", "parent_id")
                            .to("playlists", "id")
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        // Modern per-platform playlist linkage
        manager
            .create_table(
                Table::create()
                    .table("playlist_platform_info")
                    .if_not_exists()
                    .col(
                        ColumnDef::new("id")
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new("playlist_id").big_integer().not_null())
                    .col(ColumnDef::new("platform").string().not_null())
                    .col(ColumnDef::new("platform_id").string().not_null())
                    .col(ColumnDef::new("uri").string())
                    .col(ColumnDef::new("metadata").string())
                    .col(ColumnDef::new("last_linked").timestamp().not_null())
                    .col(ColumnDef::new("created_at").timestamp().not_null())
                    .col(ColumnDef::new("updated_at").timestamp().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_playlist_platform_info_playlist_id")
                            .from("playlist_platform_info", "playlist_id")
                            .to("playlists", "id")
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_playlist_platform_info_playlist_platform")
                    .table("playlist_platform_info")
                    .col("playlist_id")
                    .col("platform")
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Ordered playlist membership
        manager
            .create_table(
                Table::create()
                    .table("playlist_tracks")
                    .if_not_exists()
                    .col(ColumnDef::new("playlist_id").big_integer().not_null())
                    .col(ColumnDef::new("track_id").big_integer().not_null())
                    .col(ColumnDef::new("position").integer().not_null())
                    .col(ColumnDef::new("added_at").timestamp().not_null())
                    .primary_key(Index::create().col("playlist_id").col("track_id"))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_playlist_tracks_playlist_id")
                            .from("playlist_tracks", "playlist_id")
                            .to("playlists", "id")
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_playlist_tracks_track_id")
                            .from("playlist_tracks", "track_id")
                            .to("tracks", "id")
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_playlist_tracks_playlist_position")
                    .table("playlist_tracks")
                    .col("playlist_id")
                    .col("position")
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Drop tables in reverse order
        manager
            .drop_table(Table::drop().table("playlist_tracks").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table("playlist_platform_info").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table("playlists").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table("track_platform_info").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table("tracks").to_owned())
            .await?;

        Ok(())
    }
}
