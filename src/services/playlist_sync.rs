use std::sync::Arc;

use color_eyre::eyre::{Result, WrapErr};
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::database::Database;
use crate::entities;
use crate::ports::spotify::SpotifyApi;

/// Projects each genre's matched tracks into a chain of capacity-bounded
/// Spotify playlists, appending only what is missing.
pub struct PlaylistSynchronizer<C: SpotifyApi> {
    db: Arc<Database>,
    client: C,
    config: SyncConfig,
}

impl<C: SpotifyApi> PlaylistSynchronizer<C> {
    pub fn new(db: Arc<Database>, client: C, config: SyncConfig) -> Self {
        Self { db, client, config }
    }

    /// Sync every genre with matched tracks. A failing genre is logged and
    /// surfaced after the rest have run; its already-applied batches stay
    /// committed and the next run resumes idempotently.
    pub async fn sync_all(&self, cancel: &CancellationToken) -> Result<()> {
        let mut failed = Vec::new();
        for genre in self.db.genres().await? {
            if cancel.is_cancelled() {
                tracing::info!("Playlist sync cancelled");
                break;
            }
            if let Err(err) = self.sync(&genre, cancel).await {
                tracing::error!(genre = %genre, error = ?err, "Playlist sync failed for genre");
                failed.push(genre);
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(color_eyre::eyre::eyre!(
                "Playlist sync failed for: {}",
                failed.join(", ")
            ))
        }
    }

    /// Bring one genre's playlist chain up to date with its matched tracks.
    pub async fn sync(&self, genre: &str, cancel: &CancellationToken) -> Result<()> {
        let mut active = match self.db.mappings_for_genre(genre).await?.pop() {
            Some(mapping) => mapping,
            None => self.create_next_mapping(genre, 0).await?,
        };

        // Full membership of the active playlist; an incomplete view would
        // risk duplicate adds, so any pagination failure aborts this genre.
        let current = self
            .client
            .playlist_track_ids(&active.spotify_playlist_id)
            .await
            .wrap_err_with(|| format!("Failed to list playlist membership for genre {genre}"))?;

        let desired = self.db.matched_track_ids(genre).await?;
        let missing: Vec<String> = desired
            .into_iter()
            .filter(|track_id| !current.contains(track_id))
            .collect();

        tracing::info!(
            genre,
            playlist_id = %active.spotify_playlist_id,
            current = current.len(),
            missing = missing.len(),
            "Syncing genre"
        );

        for batch in missing.chunks(self.config.batch_size) {
            if cancel.is_cancelled() {
                tracing::info!(genre, "Playlist sync cancelled mid-genre");
                break;
            }

            // A batch that would overflow the cap moves whole to a fresh
            // playlist; it is never split across two.
            if active.track_count + batch.len() as i32 > self.config.playlist_cap {
                tracing::info!(
                    genre,
                    sequence = active.sequence_number + 1,
                    "Playlist cap reached, rolling over to a new playlist"
                );
                active = self
                    .create_next_mapping(genre, active.sequence_number + 1)
                    .await?;
            }

            self.client
                .add_tracks(&active.spotify_playlist_id, batch)
                .await
                .wrap_err_with(|| format!("Failed to append batch for genre {genre}"))?;

            active = self
                .db
                .update_mapping_after_append(active.id, active.track_count + batch.len() as i32)
                .await?;
        }

        // Refreshed even when nothing was appended
        self.client
            .update_description(&active.spotify_playlist_id, &sync_description())
            .await
            .wrap_err_with(|| format!("Failed to update playlist description for genre {genre}"))?;
        self.db.touch_mapping(active.id).await?;

        Ok(())
    }

    async fn create_next_mapping(
        &self,
        genre: &str,
        sequence_number: i32,
    ) -> Result<entities::playlist_mapping::Model> {
        let name = playlist_name(genre, sequence_number);
        let playlist_id = self
            .client
            .create_playlist(&name, &sync_description())
            .await
            .wrap_err_with(|| format!("Failed to create playlist for genre {genre}"))?;
        self.db
            .create_mapping(genre, sequence_number, &playlist_id)
            .await
    }
}

/// Seq 0 keeps the bare genre name; continuations are numbered so the chain
/// reads naturally in the Spotify UI.
fn playlist_name(genre: &str, sequence_number: i32) -> String {
    if sequence_number == 0 {
        genre.to_string()
    } else {
        format!("{genre} [{}]", sequence_number + 1)
    }
}

/// Deterministic description encoding the sync date.
fn sync_description() -> String {
    format!(
        "Last synced: {}. Mirrored from the shop catalog.",
        chrono::Utc::now().format("%Y-%m-%d")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MatchIds;
    use crate::ports::spotify::MockSpotifyApi;
    use crate::test_utils::test_db;
    use mockall::predicate::eq;
    use std::collections::HashSet;

    async fn insert_matched(db: &Database, genre: &str, track: &str, track_id: &str) {
        db.upsert_entry(genre, "Artist", None, track).await.unwrap();
        let entry = db
            .unmatched_entries()
            .await
            .unwrap()
            .into_iter()
            .find(|e| e.track == track)
            .unwrap();
        db.mark_matched(
            &entry,
            &MatchIds {
                track_id: track_id.into(),
                artist_id: "a".into(),
                album_id: "al".into(),
            },
            200,
        )
        .await
        .unwrap();
    }

    async fn insert_matched_range(db: &Database, genre: &str, range: std::ops::Range<usize>) {
        for i in range {
            insert_matched(db, genre, &format!("Track {i}"), &format!("t{i}")).await;
        }
    }

    fn synchronizer(db: Arc<Database>, client: MockSpotifyApi) -> PlaylistSynchronizer<MockSpotifyApi> {
        PlaylistSynchronizer::new(db, client, SyncConfig::default())
    }

    #[tokio::test]
    async fn test_creates_first_playlist_lazily() {
        let db = test_db().await;
        insert_matched(&db, "techno", "Badger Bite", "t1").await;

        let mut client = MockSpotifyApi::new();
        client
            .expect_create_playlist()
            .withf(|name, _| name == "techno")
            .times(1)
            .returning(|_, _| Ok("p1".to_string()));
        client
            .expect_playlist_track_ids()
            .with(eq("p1"))
            .returning(|_| Ok(HashSet::new()));
        client
            .expect_add_tracks()
            .withf(|playlist_id, batch| playlist_id == "p1" && batch == ["t1".to_string()])
            .times(1)
            .returning(|_, _| Ok(()));
        client
            .expect_update_description()
            .times(1)
            .returning(|_, _| Ok(()));

        synchronizer(db.clone(), client)
            .sync("techno", &CancellationToken::new())
            .await
            .unwrap();

        let mappings = db.mappings_for_genre("techno").await.unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].track_count, 1);
        assert!(mappings[0].last_synced_at.is_some());
    }

    #[tokio::test]
    async fn test_missing_is_desired_minus_membership() {
        // 150 desired, 50 already present: exactly one full batch of 100
        let db = test_db().await;
        insert_matched_range(&db, "techno", 0..150).await;
        db.create_mapping("techno", 0, "p1").await.unwrap();

        let mut client = MockSpotifyApi::new();
        client.expect_playlist_track_ids().returning(|_| {
            Ok((0..50).map(|i| format!("t{i}")).collect())
        });
        client
            .expect_add_tracks()
            .withf(|_, batch| {
                batch.len() == 100 && batch.iter().all(|id| {
                    id[1..].parse::<usize>().is_ok_and(|n| (50..150).contains(&n))
                })
            })
            .times(1)
            .returning(|_, _| Ok(()));
        client
            .expect_update_description()
            .times(1)
            .returning(|_, _| Ok(()));

        synchronizer(db.clone(), client)
            .sync("techno", &CancellationToken::new())
            .await
            .unwrap();

        let mappings = db.mappings_for_genre("techno").await.unwrap();
        assert_eq!(mappings[0].track_count, 100);
    }

    #[tokio::test]
    async fn test_overflowing_batch_moves_whole_to_new_playlist() {
        // 10 950 tracks in a capped 11 000 playlist plus a batch of 100:
        // the batch goes entirely to the next sequence, never 50/50
        let db = test_db().await;
        insert_matched_range(&db, "techno", 0..100).await;
        let mapping = db.create_mapping("techno", 0, "p1").await.unwrap();
        db.update_mapping_after_append(mapping.id, 10_950)
            .await
            .unwrap();

        let mut client = MockSpotifyApi::new();
        client
            .expect_playlist_track_ids()
            .with(eq("p1"))
            .returning(|_| Ok(HashSet::new()));
        client
            .expect_create_playlist()
            .withf(|name, _| name == "techno [2]")
            .times(1)
            .returning(|_, _| Ok("p2".to_string()));
        client
            .expect_add_tracks()
            .withf(|playlist_id, batch| playlist_id == "p2" && batch.len() == 100)
            .times(1)
            .returning(|_, _| Ok(()));
        client
            .expect_update_description()
            .with(eq("p2"), mockall::predicate::always())
            .times(1)
            .returning(|_, _| Ok(()));

        synchronizer(db.clone(), client)
            .sync("techno", &CancellationToken::new())
            .await
            .unwrap();

        let mappings = db.mappings_for_genre("techno").await.unwrap();
        assert_eq!(mappings.len(), 2);
        // Cap invariant holds on both mappings
        assert_eq!(mappings[0].track_count, 10_950);
        assert_eq!(mappings[1].sequence_number, 1);
        assert_eq!(mappings[1].track_count, 100);
    }

    #[tokio::test]
    async fn test_noop_sync_still_refreshes_description() {
        let db = test_db().await;
        insert_matched(&db, "techno", "Badger Bite", "t1").await;
        db.create_mapping("techno", 0, "p1").await.unwrap();

        let mut client = MockSpotifyApi::new();
        client
            .expect_playlist_track_ids()
            .returning(|_| Ok(HashSet::from(["t1".to_string()])));
        client
            .expect_update_description()
            .withf(|playlist_id, description| {
                playlist_id == "p1" && description.starts_with("Last synced: ")
            })
            .times(1)
            .returning(|_, _| Ok(()));

        synchronizer(db.clone(), client)
            .sync("techno", &CancellationToken::new())
            .await
            .unwrap();

        let mappings = db.mappings_for_genre("techno").await.unwrap();
        assert!(mappings[0].last_synced_at.is_some());
    }

    #[tokio::test]
    async fn test_membership_failure_aborts_genre_before_any_append() {
        let db = test_db().await;
        insert_matched(&db, "techno", "Badger Bite", "t1").await;
        db.create_mapping("techno", 0, "p1").await.unwrap();

        let mut client = MockSpotifyApi::new();
        client.expect_playlist_track_ids().returning(|_| {
            Err(crate::ports::spotify::SpotifyError::RetriesExhausted(
                Box::new(crate::ports::spotify::SpotifyError::Server { status: 502 }),
            ))
        });
        // No add_tracks / update_description expectations: any call panics

        let result = synchronizer(db.clone(), client)
            .sync("techno", &CancellationToken::new())
            .await;
        assert!(result.is_err());

        let mappings = db.mappings_for_genre("techno").await.unwrap();
        assert_eq!(mappings[0].track_count, 0);
    }

    #[tokio::test]
    async fn test_sync_all_surfaces_failed_genres_but_continues() {
        let db = test_db().await;
        insert_matched(&db, "dub", "Mango Drive", "t1").await;
        insert_matched(&db, "techno", "Badger Bite", "t2").await;
        db.create_mapping("dub", 0, "p-dub").await.unwrap();
        db.create_mapping("techno", 0, "p-techno").await.unwrap();

        let mut client = MockSpotifyApi::new();
        client
            .expect_playlist_track_ids()
            .with(eq("p-dub"))
            .returning(|_| {
                Err(crate::ports::spotify::SpotifyError::Rejected { status: 403 })
            });
        client
            .expect_playlist_track_ids()
            .with(eq("p-techno"))
            .returning(|_| Ok(HashSet::new()));
        client
            .expect_add_tracks()
            .withf(|playlist_id, _| playlist_id == "p-techno")
            .times(1)
            .returning(|_, _| Ok(()));
        client
            .expect_update_description()
            .times(1)
            .returning(|_, _| Ok(()));

        let result = synchronizer(db.clone(), client)
            .sync_all(&CancellationToken::new())
            .await;

        // dub failed and is surfaced; techno still synced
        assert!(result.is_err());
        let techno = db.mappings_for_genre("techno").await.unwrap();
        assert_eq!(techno[0].track_count, 1);
    }

    #[tokio::test]
    async fn test_batches_preserve_catalog_order() {
        let db = test_db().await;
        insert_matched_range(&db, "techno", 0..5).await;
        db.create_mapping("techno", 0, "p1").await.unwrap();

        let mut client = MockSpotifyApi::new();
        client
            .expect_playlist_track_ids()
            .returning(|_| Ok(HashSet::new()));
        client
            .expect_add_tracks()
            .withf(|_, batch| {
                batch == ["t0", "t1", "t2", "t3", "t4"].map(String::from)
            })
            .times(1)
            .returning(|_, _| Ok(()));
        client
            .expect_update_description()
            .returning(|_, _| Ok(()));

        synchronizer(db, client)
            .sync("techno", &CancellationToken::new())
            .await
            .unwrap();
    }
}
