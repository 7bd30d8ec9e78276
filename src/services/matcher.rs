use std::sync::Arc;

use color_eyre::eyre::{Result, WrapErr};
use tokio_util::sync::CancellationToken;

use crate::config::MatcherConfig;
use crate::database::{Database, MatchIds};
use crate::entities;
use crate::ports::spotify::{SearchCandidate, SpotifyApi, SpotifyError};
use crate::similarity;

/// Compilation releases are scraped with this placeholder artist; searching by
/// it is meaningless, so those entries search by track + album instead.
const VARIOUS_ARTISTS: &str = "Various Artists";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Matched,
    NotFound,
    /// An eligible candidate existed but lacked a usable id; the entry stays
    /// unmatched and will be revisited on the next run.
    Anomaly,
}

#[derive(Debug, Default)]
pub struct MatchRunSummary {
    pub matched: u64,
    pub not_found: u64,
    pub anomalies: u64,
    /// Entries whose search failed outright this run; they stay unmatched.
    pub failed: u64,
}

/// Reconciles unmatched catalog entries against the Spotify track catalog.
pub struct Matcher<C: SpotifyApi> {
    db: Arc<Database>,
    client: C,
    config: MatcherConfig,
}

impl<C: SpotifyApi> Matcher<C> {
    pub fn new(db: Arc<Database>, client: C, config: MatcherConfig) -> Self {
        Self { db, client, config }
    }

    /// Drain the work queue of unmatched entries, one at a time.
    ///
    /// An expired token is refreshed once per entry and the same entry
    /// retried; an authorization failure after that aborts the run so partial
    /// progress stays committed and consistent. Any other Spotify failure
    /// (retry budget exhausted, permanent rejection) is scoped to its entry:
    /// the entry stays unmatched and the queue keeps draining.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<MatchRunSummary> {
        let entries = self.db.unmatched_entries().await?;
        tracing::info!(count = entries.len(), "Reconciling unmatched entries");

        let mut summary = MatchRunSummary::default();
        for entry in entries {
            if cancel.is_cancelled() {
                tracing::info!("Match run cancelled");
                break;
            }

            match self.reconcile_with_refresh(&entry).await {
                Ok(ReconcileOutcome::Matched) => summary.matched += 1,
                Ok(ReconcileOutcome::NotFound) => summary.not_found += 1,
                Ok(ReconcileOutcome::Anomaly) => summary.anomalies += 1,
                Err(err)
                    if matches!(
                        err.downcast_ref::<SpotifyError>(),
                        Some(SpotifyError::Unauthorized)
                    ) =>
                {
                    return Err(
                        err.wrap_err("Authorization failed after a token refresh, aborting run")
                    );
                }
                Err(err) if err.downcast_ref::<SpotifyError>().is_some() => {
                    tracing::error!(
                        entry_id = entry.id,
                        artist = %entry.artist,
                        track = %entry.track,
                        error = ?err,
                        "Entry failed, leaving it queued for the next run"
                    );
                    summary.failed += 1;
                }
                Err(err) => return Err(err),
            }
        }

        tracing::info!(
            matched = summary.matched,
            not_found = summary.not_found,
            anomalies = summary.anomalies,
            failed = summary.failed,
            "Match run finished"
        );
        Ok(summary)
    }

    /// Resolve one entry, refreshing the access token once if it has expired.
    async fn reconcile_with_refresh(
        &self,
        entry: &entities::catalog_entry::Model,
    ) -> Result<ReconcileOutcome> {
        match self.reconcile(entry).await {
            Err(err)
                if matches!(
                    err.downcast_ref::<SpotifyError>(),
                    Some(SpotifyError::Unauthorized)
                ) =>
            {
                tracing::warn!(entry_id = entry.id, "Access token expired, refreshing");
                self.client
                    .refresh_access_token()
                    .await
                    .wrap_err("Failed to refresh access token")?;
                self.reconcile(entry).await
            }
            result => result,
        }
    }

    /// Resolve a single entry: search, score the candidates, commit the
    /// outcome.
    pub async fn reconcile(
        &self,
        entry: &entities::catalog_entry::Model,
    ) -> Result<ReconcileOutcome> {
        let query = build_query(entry);
        let candidates = self
            .client
            .search_tracks(&query, self.config.search_limit)
            .await?;

        let Some((winner, confidence)) = self.pick_winner(entry, &candidates) else {
            tracing::debug!(
                entry_id = entry.id,
                artist = %entry.artist,
                track = %entry.track,
                "No candidate cleared the similarity threshold"
            );
            self.db.mark_not_found(entry).await?;
            return Ok(ReconcileOutcome::NotFound);
        };

        let (Some(track_id), Some(artist_id), Some(album_id)) = (
            winner.track_id.clone(),
            winner.artist_id.clone(),
            winner.album_id.clone(),
        ) else {
            tracing::warn!(
                entry_id = entry.id,
                artist = %entry.artist,
                track = %entry.track,
                candidate = %winner.track_name,
                "Eligible candidate is missing identifiers, leaving entry unmatched"
            );
            return Ok(ReconcileOutcome::Anomaly);
        };

        self.db
            .mark_matched(
                entry,
                &MatchIds {
                    track_id,
                    artist_id,
                    album_id,
                },
                confidence as i32,
            )
            .await?;
        tracing::debug!(
            entry_id = entry.id,
            confidence,
            candidate = %winner.track_name,
            "Entry matched"
        );
        Ok(ReconcileOutcome::Matched)
    }

    /// Best eligible candidate by combined similarity, stable on ties.
    ///
    /// Eligibility requires both artist and track similarity to exceed the
    /// threshold; an exact album name match earns a fixed bonus.
    fn pick_winner<'a>(
        &self,
        entry: &entities::catalog_entry::Model,
        candidates: &'a [SearchCandidate],
    ) -> Option<(&'a SearchCandidate, u32)> {
        let threshold = self.config.similarity_threshold;
        let mut best: Option<(&SearchCandidate, u32)> = None;

        for candidate in candidates {
            let artist_similarity = similarity::score(&entry.artist, &candidate.artist_name);
            let track_similarity = similarity::score(&entry.track, &candidate.track_name);
            if artist_similarity <= threshold || track_similarity <= threshold {
                continue;
            }

            let mut score = artist_similarity + track_similarity;
            if entry.album.as_deref() == Some(candidate.album_name.as_str()) {
                score += self.config.album_bonus;
            }

            // Strict > keeps the first-seen candidate on ties
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((candidate, score));
            }
        }

        best
    }
}

fn build_query(entry: &entities::catalog_entry::Model) -> String {
    if entry.artist == VARIOUS_ARTISTS {
        match &entry.album {
            Some(album) => format!("{} {}", entry.track, album),
            None => entry.track.clone(),
        }
    } else {
        format!("{} {}", entry.track, entry.artist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::catalog_entry::MatchStatus;
    use crate::ports::spotify::MockSpotifyApi;
    use crate::test_utils::test_db;
    use sea_orm::EntityTrait;

    fn candidate(track: &str, artist: &str, album: &str) -> SearchCandidate {
        SearchCandidate {
            track_id: Some(format!("track:{track}")),
            track_name: track.to_string(),
            artist_id: Some(format!("artist:{artist}")),
            artist_name: artist.to_string(),
            album_id: Some(format!("album:{album}")),
            album_name: album.to_string(),
        }
    }

    async fn insert_entry(
        db: &Database,
        genre: &str,
        artist: &str,
        album: Option<&str>,
        track: &str,
    ) -> entities::catalog_entry::Model {
        db.upsert_entry(genre, artist, album, track).await.unwrap();
        db.unmatched_entries()
            .await
            .unwrap()
            .into_iter()
            .find(|e| e.track == track)
            .unwrap()
    }

    fn matcher(db: Arc<Database>, client: MockSpotifyApi) -> Matcher<MockSpotifyApi> {
        Matcher::new(db, client, MatcherConfig::default())
    }

    #[tokio::test]
    async fn test_exact_match_is_committed() {
        let db = test_db().await;
        let entry = insert_entry(&db, "techno", "Surgeon", None, "Badger Bite").await;

        let mut client = MockSpotifyApi::new();
        client
            .expect_search_tracks()
            .withf(|query, limit| query == "Badger Bite Surgeon" && *limit == 5)
            .returning(|_, _| Ok(vec![candidate("Badger Bite", "Surgeon", "Balance")]));

        let outcome = matcher(db.clone(), client)
            .reconcile(&entry)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Matched);

        let entry = db.get_entry(entry.id).await.unwrap().unwrap();
        assert_eq!(entry.status, MatchStatus::Matched);
        assert_eq!(entry.spotify_track_id.as_deref(), Some("track:Badger Bite"));
        // Both similarities are 100 and there is no scraped album, so no bonus
        assert_eq!(entry.confidence, Some(200));
    }

    #[tokio::test]
    async fn test_various_artists_searches_by_track_and_album() {
        let db = test_db().await;
        let entry = insert_entry(
            &db,
            "outernational",
            "Various Artists",
            Some("Calypso Gold"),
            "Jump In The Line",
        )
        .await;

        let mut client = MockSpotifyApi::new();
        client
            .expect_search_tracks()
            .withf(|query, _| query == "Jump In The Line Calypso Gold")
            .returning(|_, _| Ok(vec![]));

        let outcome = matcher(db, client).reconcile(&entry).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_no_candidates_records_not_found() {
        let db = test_db().await;
        let entry = insert_entry(&db, "techno", "Surgeon", None, "Badger Bite").await;

        let mut client = MockSpotifyApi::new();
        client
            .expect_search_tracks()
            .returning(|_, _| Ok(vec![]));

        let outcome = matcher(db.clone(), client)
            .reconcile(&entry)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::NotFound);

        let entry = db.get_entry(entry.id).await.unwrap().unwrap();
        assert_eq!(entry.status, MatchStatus::NotFound);
        let records = entities::not_found_record::Entity::find()
            .all(&db.conn)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].track, "Badger Bite");
    }

    #[tokio::test]
    async fn test_below_threshold_candidates_are_ineligible() {
        let db = test_db().await;
        let entry = insert_entry(&db, "techno", "Surgeon", None, "Badger Bite").await;

        let mut client = MockSpotifyApi::new();
        client.expect_search_tracks().returning(|_, _| {
            Ok(vec![candidate("Completely Different Song", "Surgeon", "X")])
        });

        let outcome = matcher(db, client).reconcile(&entry).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_album_bonus_breaks_near_ties() {
        let db = test_db().await;
        let entry = insert_entry(&db, "techno", "Surgeon", Some("Balance"), "Badger Bite").await;

        let mut client = MockSpotifyApi::new();
        client.expect_search_tracks().returning(|_, _| {
            Ok(vec![
                candidate("Badger Bite", "Surgeon", "Force + Form"),
                candidate("Badger Bite", "Surgeon", "Balance"),
            ])
        });

        matcher(db.clone(), client).reconcile(&entry).await.unwrap();

        let entry = db.get_entry(entry.id).await.unwrap().unwrap();
        assert_eq!(entry.spotify_album_id.as_deref(), Some("album:Balance"));
        assert_eq!(entry.confidence, Some(210));
    }

    #[tokio::test]
    async fn test_ties_keep_first_seen_candidate() {
        let db = test_db().await;
        let entry = insert_entry(&db, "techno", "Surgeon", None, "Badger Bite").await;

        let mut client = MockSpotifyApi::new();
        client.expect_search_tracks().returning(|_, _| {
            Ok(vec![
                candidate("Badger Bite", "Surgeon", "First Album"),
                candidate("Badger Bite", "Surgeon", "Second Album"),
            ])
        });

        matcher(db.clone(), client).reconcile(&entry).await.unwrap();

        let entry = db.get_entry(entry.id).await.unwrap().unwrap();
        assert_eq!(
            entry.spotify_album_id.as_deref(),
            Some("album:First Album")
        );
    }

    #[tokio::test]
    async fn test_missing_identifier_leaves_entry_unmatched() {
        let db = test_db().await;
        let entry = insert_entry(&db, "techno", "Surgeon", None, "Badger Bite").await;

        let mut client = MockSpotifyApi::new();
        client.expect_search_tracks().returning(|_, _| {
            let mut winner = candidate("Badger Bite", "Surgeon", "Balance");
            winner.album_id = None;
            Ok(vec![winner])
        });

        let outcome = matcher(db.clone(), client)
            .reconcile(&entry)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Anomaly);

        // Revisited on the next run without a reset
        let entry = db.get_entry(entry.id).await.unwrap().unwrap();
        assert_eq!(entry.status, MatchStatus::Unmatched);
        assert_eq!(db.unmatched_entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_is_idempotent_for_resolved_entries() {
        let db = test_db().await;
        insert_entry(&db, "techno", "Surgeon", None, "Badger Bite").await;

        let mut client = MockSpotifyApi::new();
        client
            .expect_search_tracks()
            .times(1)
            .returning(|_, _| Ok(vec![candidate("Badger Bite", "Surgeon", "Balance")]));

        let matcher = matcher(db.clone(), client);
        let cancel = CancellationToken::new();

        let summary = matcher.run(&cancel).await.unwrap();
        assert_eq!(summary.matched, 1);

        // Second run finds an empty work queue; the mock would panic on a
        // second search call
        let summary = matcher.run(&cancel).await.unwrap();
        assert_eq!(summary.matched, 0);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_once_and_entry_retried() {
        let db = test_db().await;
        insert_entry(&db, "techno", "Surgeon", None, "Badger Bite").await;

        let mut client = MockSpotifyApi::new();
        let mut calls = 0;
        client.expect_search_tracks().returning(move |_, _| {
            calls += 1;
            if calls == 1 {
                Err(SpotifyError::Unauthorized)
            } else {
                Ok(vec![candidate("Badger Bite", "Surgeon", "Balance")])
            }
        });
        client
            .expect_refresh_access_token()
            .times(1)
            .returning(|| Ok(()));

        let summary = matcher(db, client)
            .run(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.matched, 1);
    }

    #[tokio::test]
    async fn test_transient_exhaustion_skips_entry_but_run_continues() {
        let db = test_db().await;
        insert_entry(&db, "techno", "Surgeon", None, "Badger Bite").await;
        insert_entry(&db, "techno", "Surgeon", None, "Magneze").await;

        let mut client = MockSpotifyApi::new();
        client
            .expect_search_tracks()
            .withf(|query, _| query == "Badger Bite Surgeon")
            .returning(|_, _| {
                Err(SpotifyError::RetriesExhausted(Box::new(
                    SpotifyError::Server { status: 502 },
                )))
            });
        client
            .expect_search_tracks()
            .withf(|query, _| query == "Magneze Surgeon")
            .returning(|_, _| Ok(vec![candidate("Magneze", "Surgeon", "Balance")]));

        let summary = matcher(db.clone(), client)
            .run(&CancellationToken::new())
            .await
            .unwrap();

        // One entry's dead search never takes down the rest of the queue
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.failed, 1);

        let queue = db.unmatched_entries().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].track, "Badger Bite");
    }

    #[tokio::test]
    async fn test_permanent_rejection_skips_entry_but_run_continues() {
        let db = test_db().await;
        insert_entry(&db, "techno", "Surgeon", None, "Badger Bite").await;
        insert_entry(&db, "techno", "Surgeon", None, "Magneze").await;

        let mut client = MockSpotifyApi::new();
        client
            .expect_search_tracks()
            .withf(|query, _| query == "Badger Bite Surgeon")
            .returning(|_, _| Err(SpotifyError::Rejected { status: 400 }));
        client
            .expect_search_tracks()
            .withf(|query, _| query == "Magneze Surgeon")
            .returning(|_, _| Ok(vec![candidate("Magneze", "Surgeon", "Balance")]));

        let summary = matcher(db.clone(), client)
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.matched, 1);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_repeated_auth_failure_aborts_run() {
        let db = test_db().await;
        insert_entry(&db, "techno", "Surgeon", None, "Badger Bite").await;
        insert_entry(&db, "techno", "Surgeon", None, "Magneze").await;

        let mut client = MockSpotifyApi::new();
        client
            .expect_search_tracks()
            .returning(|_, _| Err(SpotifyError::Unauthorized));
        client
            .expect_refresh_access_token()
            .times(1)
            .returning(|| Ok(()));

        let result = matcher(db.clone(), client).run(&CancellationToken::new()).await;
        assert!(result.is_err());

        // Nothing was corrupted: both entries still queued
        assert_eq!(db.unmatched_entries().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_stops_between_entries() {
        let db = test_db().await;
        insert_entry(&db, "techno", "Surgeon", None, "Badger Bite").await;
        insert_entry(&db, "techno", "Surgeon", None, "Magneze").await;

        let client = MockSpotifyApi::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = matcher(db.clone(), client).run(&cancel).await.unwrap();
        assert_eq!(summary.matched + summary.not_found + summary.anomalies, 0);
        assert_eq!(db.unmatched_entries().await.unwrap().len(), 2);
    }
}
