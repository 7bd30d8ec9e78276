use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create catalog_entries table
        manager
            .create_table(
                Table::create()
                    .table(CatalogEntry::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CatalogEntry::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CatalogEntry::Genre).string().not_null())
                    .col(ColumnDef::new(CatalogEntry::Artist).string().not_null())
                    .col(ColumnDef::new(CatalogEntry::Album).string())
                    .col(ColumnDef::new(CatalogEntry::Track).string().not_null())
                    .col(ColumnDef::new(CatalogEntry::Status).string().not_null())
                    .col(ColumnDef::new(CatalogEntry::SpotifyTrackId).string())
                    .col(ColumnDef::new(CatalogEntry::SpotifyArtistId).string())
                    .col(ColumnDef::new(CatalogEntry::SpotifyAlbumId).string())
                    .col(ColumnDef::new(CatalogEntry::Confidence).integer())
                    .col(
                        ColumnDef::new(CatalogEntry::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CatalogEntry::UpdatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Duplicate scraped rows collapse onto this key
        manager
            .create_index(
                Index::create()
                    .name("idx_catalog_entries_genre_artist_track")
                    .table(CatalogEntry::Table)
                    .col(CatalogEntry::Genre)
                    .col(CatalogEntry::Artist)
                    .col(CatalogEntry::Track)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_catalog_entries_status")
                    .table(CatalogEntry::Table)
                    .col(CatalogEntry::Status)
                    .to_owned(),
            )
            .await?;

        // Create not_found_records table
        manager
            .create_table(
                Table::create()
                    .table(NotFoundRecord::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(NotFoundRecord::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(NotFoundRecord::Genre).string().not_null())
                    .col(ColumnDef::new(NotFoundRecord::Artist).string().not_null())
                    .col(ColumnDef::new(NotFoundRecord::Track).string().not_null())
                    .col(
                        ColumnDef::new(NotFoundRecord::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_not_found_records_genre_artist_track")
                    .table(NotFoundRecord::Table)
                    .col(NotFoundRecord::Genre)
                    .col(NotFoundRecord::Artist)
                    .col(NotFoundRecord::Track)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Create playlist_mappings table
        manager
            .create_table(
                Table::create()
                    .table(PlaylistMapping::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PlaylistMapping::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PlaylistMapping::Genre).string().not_null())
                    .col(
                        ColumnDef::new(PlaylistMapping::SequenceNumber)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PlaylistMapping::SpotifyPlaylistId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PlaylistMapping::TrackCount)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PlaylistMapping::LastSyncedAt).big_integer())
                    .col(
                        ColumnDef::new(PlaylistMapping::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PlaylistMapping::UpdatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_playlist_mappings_genre_sequence")
                    .table(PlaylistMapping::Table)
                    .col(PlaylistMapping::Genre)
                    .col(PlaylistMapping::SequenceNumber)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PlaylistMapping::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(NotFoundRecord::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CatalogEntry::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum CatalogEntry {
    #[sea_orm(iden = "catalog_entries")]
    Table,
    Id,
    Genre,
    Artist,
    Album,
    Track,
    Status,
    SpotifyTrackId,
    SpotifyArtistId,
    SpotifyAlbumId,
    Confidence,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum NotFoundRecord {
    #[sea_orm(iden = "not_found_records")]
    Table,
    Id,
    Genre,
    Artist,
    Track,
    CreatedAt,
}

#[derive(DeriveIden)]
enum PlaylistMapping {
    #[sea_orm(iden = "playlist_mappings")]
    Table,
    Id,
    Genre,
    SequenceNumber,
    SpotifyPlaylistId,
    TrackCount,
    LastSyncedAt,
    CreatedAt,
    UpdatedAt,
}
