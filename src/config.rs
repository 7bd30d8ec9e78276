use std::path::PathBuf;

use color_eyre::{Result, eyre::Context};
use serde::{Deserialize, Serialize};

use crate::spotify::auth::SpotifyCredentials;

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    /// Path to the SQLite catalog database.
    database: String,
    pub spotify: SpotifyCredentials,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Matching tunables. Old revisions of the pipeline used thresholds anywhere
/// between 25 and 80; strict is the default and can be loosened per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Both artist and track similarity must exceed this (0-100).
    pub similarity_threshold: u32,
    /// Added to a candidate's score when its album name equals the scraped
    /// album exactly.
    pub album_bonus: u32,
    /// How many search candidates to consider per entry.
    pub search_limit: u32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 80,
            album_bonus: 10,
            search_limit: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Spotify's hard per-playlist track limit.
    pub playlist_cap: i32,
    /// Per-call limit of the add-tracks endpoint.
    pub batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            playlist_cap: 11_000,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub requests_per_second: u32,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 5,
            max_retries: 5,
            base_delay_ms: 500,
            max_delay_ms: 60_000,
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .context(format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|path| path.join("waxsync").join("config.toml"))
    }

    /// Load config from the default location
    pub fn load() -> Result<Self> {
        let config_path =
            Self::config_path().ok_or(color_eyre::eyre::eyre!("Config file not found"))?;

        Self::from_file(&config_path)
    }

    /// Write a template config to the default location, refusing to clobber
    /// an existing file.
    pub fn create_default() -> Result<PathBuf> {
        let path = Self::config_path()
            .ok_or(color_eyre::eyre::eyre!("No default config path available"))?;
        if path.exists() {
            return Err(color_eyre::eyre::eyre!(
                "Config already exists at {}",
                path.display()
            ));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context(format!(
                "Failed to create config directory: {}",
                parent.display()
            ))?;
        }

        let template = Config {
            database: "~/.local/share/waxsync/catalog.db".to_string(),
            spotify: SpotifyCredentials {
                client_id: "your-client-id".to_string(),
                client_secret: "your-client-secret".to_string(),
                refresh_token: None,
                user_id: "your-spotify-user-id".to_string(),
            },
            matcher: MatcherConfig::default(),
            sync: SyncConfig::default(),
            http: HttpConfig::default(),
        };

        let contents = toml::to_string_pretty(&template).context("Failed to render config")?;
        std::fs::write(&path, contents)
            .context(format!("Failed to write config: {}", path.display()))?;
        Ok(path)
    }

    /// Expand ~ to home directory
    fn expand_path(path: &str) -> PathBuf {
        if path.starts_with("~/")
            && let Some(home) = dirs::home_dir()
        {
            return home.join(&path[2..]);
        }
        PathBuf::from(path)
    }

    pub fn database_path(&self) -> PathBuf {
        Self::expand_path(&self.database)
    }
}
