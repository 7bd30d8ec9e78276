use std::collections::HashSet;
use std::time::Duration;

/// Error taxonomy for the Spotify Web API.
///
/// `RateLimited` and `Server` are transient and normally consumed inside the
/// client's retry loop; callers mostly see `Unauthorized` (refresh the token
/// and retry the current unit of work once), `Rejected` (permanent, don't
/// retry) and `RetriesExhausted`.
#[derive(Debug, thiserror::Error)]
pub enum SpotifyError {
    #[error("spotify authorization expired")]
    Unauthorized,
    #[error("spotify rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },
    #[error("spotify server error: {status}")]
    Server { status: u16 },
    #[error("spotify rejected the request: {status}")]
    Rejected { status: u16 },
    #[error("retry budget exhausted: {0}")]
    RetriesExhausted(#[source] Box<SpotifyError>),
    #[error("spotify returned an unreadable response: {0}")]
    MalformedResponse(String),
    #[error("token endpoint returned no access token")]
    MissingAccessToken,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl SpotifyError {
    /// Whether another attempt under the backoff schedule can still succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Server { .. }
                | Self::Http(_)
                | Self::MalformedResponse(_)
        )
    }
}

/// One search result, decoupled from the wire format. Ids are optional because
/// the API omits them for some catalog items (local/unavailable tracks).
#[derive(Debug, Clone)]
pub struct SearchCandidate {
    pub track_id: Option<String>,
    pub track_name: String,
    pub artist_id: Option<String>,
    pub artist_name: String,
    pub album_id: Option<String>,
    pub album_name: String,
}

/// Port trait wrapping the Spotify API capabilities used by business logic.
///
/// The production implementation lives in `spotify::client`; tests use the
/// generated mock.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SpotifyApi: Send + Sync {
    /// Search the track catalog, returning at most `limit` candidates in API
    /// ranking order.
    async fn search_tracks(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<SearchCandidate>, SpotifyError>;

    /// Create a public playlist and return its Spotify id.
    async fn create_playlist(&self, name: &str, description: &str)
    -> Result<String, SpotifyError>;

    /// Full track membership of a playlist, paginated to exhaustion. Errors
    /// out rather than returning a partial view.
    async fn playlist_track_ids(&self, playlist_id: &str)
    -> Result<HashSet<String>, SpotifyError>;

    /// Append tracks to a playlist. Callers must respect the per-call batch
    /// limit.
    async fn add_tracks(&self, playlist_id: &str, track_ids: &[String])
    -> Result<(), SpotifyError>;

    async fn update_description(
        &self,
        playlist_id: &str,
        description: &str,
    ) -> Result<(), SpotifyError>;

    /// Acquire a fresh access token, replacing the one used by later calls.
    async fn refresh_access_token(&self) -> Result<(), SpotifyError>;
}
