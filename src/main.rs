mod config;
mod database;
mod entities;
mod ingest;
mod logging;
mod ports;
mod services;
mod similarity;
mod spotify;
#[cfg(test)]
mod test_utils;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::{Result, eyre::Context};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    database::Database,
    logging::init_tracing,
    services::{matcher::Matcher, playlist_sync::PlaylistSynchronizer},
    spotify::SpotifyClient,
    spotify::client::RetryPolicy,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The config file to use
    #[arg(short, long, env = "WAXSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter (tracing EnvFilter syntax)
    #[arg(long, default_value = "info", global = true, env = "WAXSYNC_LOG")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import a scraped catalog JSON file
    Import {
        /// The catalog file to import
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Reconcile unmatched catalog entries against Spotify
    Match,
    /// Sync matched tracks into per-genre playlists
    Sync {
        /// Only sync this genre
        #[arg(short, long)]
        genre: Option<String>,
    },
    /// Reconcile and then sync, in one pass
    Run,
    /// Re-queue matched/not-found entries for another reconcile pass
    Reset {
        /// Only reset this genre
        #[arg(short, long)]
        genre: Option<String>,
    },
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Create a default config file, if it doesn't exist
    CreateDefault,
    /// Print the path to the config file
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    init_tracing(&args.log_level)?;

    if let Commands::Config(config_commands) = &args.command {
        match config_commands {
            ConfigCommands::CreateDefault => {
                let path = Config::create_default()?;
                println!("Created config at {}", path.display());
            }
            ConfigCommands::Path => match Config::config_path() {
                Some(path) => println!("{}", path.display()),
                None => println!("No default config path found"),
            },
        }
        return Ok(());
    }

    tracing::debug!("Loading configuration");
    let config = {
        if let Some(config) = args.config {
            Config::from_file(&config)
        } else {
            Config::load()
        }
    }
    .with_context(|| "Failed to load waxsync config")?;

    let database = Arc::new(Database::open(&config.database_path()).await?);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, finishing the current unit of work");
                cancel.cancel();
            }
        });
    }

    match args.command {
        Commands::Import { input } => {
            let summary = ingest::import_file(&database, &input).await?;
            tracing::info!(
                inserted = summary.inserted,
                skipped = summary.skipped,
                "Import completed"
            );
        }
        Commands::Match => {
            let client = connect_spotify(&config).await?;
            Matcher::new(database, client, config.matcher.clone())
                .run(&cancel)
                .await?;
        }
        Commands::Sync { genre } => {
            let client = connect_spotify(&config).await?;
            let synchronizer = PlaylistSynchronizer::new(database, client, config.sync.clone());
            match genre {
                Some(genre) => synchronizer.sync(&genre, &cancel).await?,
                None => synchronizer.sync_all(&cancel).await?,
            }
        }
        Commands::Run => {
            let client = connect_spotify(&config).await?;
            Matcher::new(database.clone(), client, config.matcher.clone())
                .run(&cancel)
                .await?;
            if !cancel.is_cancelled() {
                let client = connect_spotify(&config).await?;
                PlaylistSynchronizer::new(database, client, config.sync.clone())
                    .sync_all(&cancel)
                    .await?;
            }
        }
        Commands::Reset { genre } => {
            let requeued = database.reset(genre.as_deref()).await?;
            tracing::info!(requeued, "Reset completed");
        }
        Commands::Config(_) => unreachable!("handled before config load"),
    }

    Ok(())
}

async fn connect_spotify(config: &Config) -> Result<SpotifyClient> {
    let retry = RetryPolicy {
        max_attempts: config.http.max_retries,
        base_delay: Duration::from_millis(config.http.base_delay_ms),
        max_delay: Duration::from_millis(config.http.max_delay_ms),
    };
    SpotifyClient::connect(
        config.spotify.clone(),
        config.http.requests_per_second,
        retry,
    )
    .await
    .context("Failed to connect to Spotify")
}
