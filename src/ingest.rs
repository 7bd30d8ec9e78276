//! Catalog ingestion from scraped JSON.
//!
//! The scraper dumps one JSON array per genre of release objects with their
//! track listings. Importing is set-semantic: a (genre, artist, track) tuple
//! seen before is skipped, so re-importing a refreshed dump only adds the new
//! releases.

use std::path::Path;

use color_eyre::{Result, eyre::Context};
use serde::Deserialize;

use crate::database::Database;

#[derive(Debug, Deserialize)]
pub struct ScrapedRelease {
    pub genre: String,
    pub artist: String,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub tracks: Vec<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: u64,
    pub skipped: u64,
}

pub async fn import_file(db: &Database, path: &Path) -> Result<ImportSummary> {
    let contents = std::fs::read_to_string(path)
        .context(format!("Failed to read catalog file: {}", path.display()))?;
    let releases: Vec<ScrapedRelease> = serde_json::from_str(&contents)
        .context(format!("Failed to parse catalog file: {}", path.display()))?;

    let mut summary = ImportSummary::default();
    for release in &releases {
        for track in &release.tracks {
            let inserted = db
                .upsert_entry(
                    &release.genre,
                    &release.artist,
                    release.album.as_deref(),
                    track,
                )
                .await?;
            if inserted {
                summary.inserted += 1;
            } else {
                summary.skipped += 1;
            }
        }
    }

    tracing::info!(
        inserted = summary.inserted,
        skipped = summary.skipped,
        releases = releases.len(),
        "Imported catalog file: {}",
        path.display()
    );
    Ok(summary)
}
