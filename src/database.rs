use std::path::Path;
use std::time::Duration;

use color_eyre::{Result, eyre::Context};
use migration::MigratorTrait;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectOptions,
    Database as SeaDatabase, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    TryInsertResult,
};

use crate::entities;
use crate::entities::catalog_entry::MatchStatus;

pub struct Database {
    pub conn: DatabaseConnection,
}

/// External-catalog identifiers of a winning search candidate.
#[derive(Debug, Clone)]
pub struct MatchIds {
    pub track_id: String,
    pub artist_id: String,
    pub album_id: String,
}

impl Database {
    /// Open or create a database at the given path and bring the schema up to
    /// date.
    pub async fn open(path: &Path) -> Result<Self> {
        tracing::debug!("Opening database at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context(format!(
                "Failed to create database directory: {}",
                parent.display()
            ))?;
        }

        let url = format!("sqlite://{}?mode=rwc", path.display());

        let mut opt = ConnectOptions::new(url);
        opt.max_connections(10)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(8))
            .acquire_timeout(Duration::from_secs(8))
            .sqlx_logging(false);

        let conn = SeaDatabase::connect(opt)
            .await
            .context(format!("Failed to open database: {}", path.display()))?;

        tracing::debug!("Running database migrations");
        migration::Migrator::up(&conn, None)
            .await
            .context("Failed to run database migrations")?;

        tracing::info!("Database ready at: {}", path.display());
        Ok(Database { conn })
    }

    // ========== Catalog Entry Methods ==========

    /// Insert a scraped catalog tuple, skipping silently when the
    /// (genre, artist, track) key already exists. Returns whether a new row
    /// was created.
    pub async fn upsert_entry(
        &self,
        genre: &str,
        artist: &str,
        album: Option<&str>,
        track: &str,
    ) -> Result<bool> {
        let entry = entities::catalog_entry::ActiveModel {
            genre: Set(genre.to_string()),
            artist: Set(artist.to_string()),
            album: Set(album.map(|s| s.to_string())),
            track: Set(track.to_string()),
            status: Set(MatchStatus::Unmatched),
            ..entities::catalog_entry::ActiveModel::new()
        };

        let result = entities::catalog_entry::Entity::insert(entry)
            .on_conflict(
                OnConflict::columns([
                    entities::catalog_entry::Column::Genre,
                    entities::catalog_entry::Column::Artist,
                    entities::catalog_entry::Column::Track,
                ])
                .do_nothing()
                .to_owned(),
            )
            .do_nothing()
            .exec(&self.conn)
            .await
            .context("Failed to insert catalog entry")?;

        Ok(matches!(result, TryInsertResult::Inserted(_)))
    }

    /// Work queue: entries not yet reconciled, in insertion order.
    pub async fn unmatched_entries(&self) -> Result<Vec<entities::catalog_entry::Model>> {
        entities::catalog_entry::Entity::find()
            .filter(entities::catalog_entry::Column::Status.eq(MatchStatus::Unmatched))
            .order_by_asc(entities::catalog_entry::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to query unmatched entries")
    }

    pub async fn get_entry(&self, id: i64) -> Result<Option<entities::catalog_entry::Model>> {
        entities::catalog_entry::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to get catalog entry")
    }

    /// Commit a match: status, external ids and confidence in one row update.
    pub async fn mark_matched(
        &self,
        entry: &entities::catalog_entry::Model,
        ids: &MatchIds,
        confidence: i32,
    ) -> Result<()> {
        let mut active: entities::catalog_entry::ActiveModel = entry.clone().into();
        active.status = Set(MatchStatus::Matched);
        active.spotify_track_id = Set(Some(ids.track_id.clone()));
        active.spotify_artist_id = Set(Some(ids.artist_id.clone()));
        active.spotify_album_id = Set(Some(ids.album_id.clone()));
        active.confidence = Set(Some(confidence));
        active
            .update(&self.conn)
            .await
            .context("Failed to mark entry matched")?;
        Ok(())
    }

    /// Commit a failed match and remember it so later runs skip the search.
    pub async fn mark_not_found(&self, entry: &entities::catalog_entry::Model) -> Result<()> {
        let mut active: entities::catalog_entry::ActiveModel = entry.clone().into();
        active.status = Set(MatchStatus::NotFound);
        active
            .update(&self.conn)
            .await
            .context("Failed to mark entry not found")?;

        let record = entities::not_found_record::ActiveModel {
            genre: Set(entry.genre.clone()),
            artist: Set(entry.artist.clone()),
            track: Set(entry.track.clone()),
            ..entities::not_found_record::ActiveModel::new()
        };

        entities::not_found_record::Entity::insert(record)
            .on_conflict(
                OnConflict::columns([
                    entities::not_found_record::Column::Genre,
                    entities::not_found_record::Column::Artist,
                    entities::not_found_record::Column::Track,
                ])
                .do_nothing()
                .to_owned(),
            )
            .do_nothing()
            .exec(&self.conn)
            .await
            .context("Failed to insert not-found record")?;

        Ok(())
    }

    /// Distinct matched track ids for a genre, in entry insertion order.
    pub async fn matched_track_ids(&self, genre: &str) -> Result<Vec<String>> {
        let entries = entities::catalog_entry::Entity::find()
            .filter(entities::catalog_entry::Column::Genre.eq(genre))
            .filter(entities::catalog_entry::Column::Status.eq(MatchStatus::Matched))
            .order_by_asc(entities::catalog_entry::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to query matched entries")?;

        let mut seen = std::collections::HashSet::new();
        let mut track_ids = Vec::new();
        for entry in entries {
            if let Some(track_id) = entry.spotify_track_id
                && seen.insert(track_id.clone())
            {
                track_ids.push(track_id);
            }
        }
        Ok(track_ids)
    }

    pub async fn genres(&self) -> Result<Vec<String>> {
        entities::catalog_entry::Entity::find()
            .select_only()
            .column(entities::catalog_entry::Column::Genre)
            .distinct()
            .order_by_asc(entities::catalog_entry::Column::Genre)
            .into_tuple::<String>()
            .all(&self.conn)
            .await
            .context("Failed to query genres")
    }

    /// Revert matched/not-found entries to unmatched, clearing external ids,
    /// and forget the corresponding not-found records. Scoped to one genre
    /// when given. Returns the number of re-queued entries.
    pub async fn reset(&self, genre: Option<&str>) -> Result<u64> {
        let mut update = entities::catalog_entry::Entity::update_many()
            .col_expr(
                entities::catalog_entry::Column::Status,
                Expr::value(MatchStatus::Unmatched),
            )
            .col_expr(
                entities::catalog_entry::Column::SpotifyTrackId,
                Expr::value(Option::<String>::None),
            )
            .col_expr(
                entities::catalog_entry::Column::SpotifyArtistId,
                Expr::value(Option::<String>::None),
            )
            .col_expr(
                entities::catalog_entry::Column::SpotifyAlbumId,
                Expr::value(Option::<String>::None),
            )
            .col_expr(
                entities::catalog_entry::Column::Confidence,
                Expr::value(Option::<i32>::None),
            )
            .filter(entities::catalog_entry::Column::Status.ne(MatchStatus::Unmatched));
        if let Some(genre) = genre {
            update = update.filter(entities::catalog_entry::Column::Genre.eq(genre));
        }
        let result = update
            .exec(&self.conn)
            .await
            .context("Failed to reset catalog entries")?;

        let mut delete = entities::not_found_record::Entity::delete_many();
        if let Some(genre) = genre {
            delete = delete.filter(entities::not_found_record::Column::Genre.eq(genre));
        }
        delete
            .exec(&self.conn)
            .await
            .context("Failed to delete not-found records")?;

        Ok(result.rows_affected)
    }

    // ========== Playlist Mapping Methods ==========

    /// Mappings for a genre ordered by sequence number; the last one is the
    /// active playlist in the chain.
    pub async fn mappings_for_genre(
        &self,
        genre: &str,
    ) -> Result<Vec<entities::playlist_mapping::Model>> {
        entities::playlist_mapping::Entity::find()
            .filter(entities::playlist_mapping::Column::Genre.eq(genre))
            .order_by_asc(entities::playlist_mapping::Column::SequenceNumber)
            .all(&self.conn)
            .await
            .context("Failed to query playlist mappings")
    }

    pub async fn create_mapping(
        &self,
        genre: &str,
        sequence_number: i32,
        spotify_playlist_id: &str,
    ) -> Result<entities::playlist_mapping::Model> {
        let mapping = entities::playlist_mapping::ActiveModel {
            genre: Set(genre.to_string()),
            sequence_number: Set(sequence_number),
            spotify_playlist_id: Set(spotify_playlist_id.to_string()),
            track_count: Set(0),
            last_synced_at: Set(None),
            ..entities::playlist_mapping::ActiveModel::new()
        };

        mapping
            .insert(&self.conn)
            .await
            .context("Failed to create playlist mapping")
    }

    /// Refresh the cached track count and sync timestamp after a successful
    /// append batch.
    pub async fn update_mapping_after_append(
        &self,
        mapping_id: i64,
        track_count: i32,
    ) -> Result<entities::playlist_mapping::Model> {
        let mapping = entities::playlist_mapping::Entity::find_by_id(mapping_id)
            .one(&self.conn)
            .await
            .context("Failed to find playlist mapping")?
            .ok_or_else(|| color_eyre::eyre::eyre!("Playlist mapping not found"))?;

        let mut active: entities::playlist_mapping::ActiveModel = mapping.into();
        active.track_count = Set(track_count);
        active.last_synced_at = Set(Some(chrono::Utc::now().timestamp()));
        active
            .update(&self.conn)
            .await
            .context("Failed to update playlist mapping")
    }

    /// Record that a sync pass completed, even when no tracks were appended.
    pub async fn touch_mapping(&self, mapping_id: i64) -> Result<()> {
        entities::playlist_mapping::Entity::update_many()
            .col_expr(
                entities::playlist_mapping::Column::LastSyncedAt,
                Expr::value(Some(chrono::Utc::now().timestamp())),
            )
            .filter(entities::playlist_mapping::Column::Id.eq(mapping_id))
            .exec(&self.conn)
            .await
            .context("Failed to touch playlist mapping")?;
        Ok(())
    }
}
