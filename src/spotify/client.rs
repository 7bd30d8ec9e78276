use std::collections::HashSet;
use std::future::Future;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::{
    Quota, RateLimiter, clock::DefaultClock, state::InMemoryState, state::direct::NotKeyed,
};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::ports::spotify::{SearchCandidate, SpotifyApi, SpotifyError};
use crate::spotify::auth::{self, SpotifyCredentials};
use crate::spotify::types::{CreatedPlaylist, PlaylistTracksPage, SearchResponse};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const API_BASE: &str = "https://api.spotify.com/v1";

/// Bounded exponential backoff schedule for retried calls. 429 responses wait
/// the server-provided hint instead of the scheduled delay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// The wait before the next attempt: the rate-limit hint when the server
    /// sent one, else the current backoff delay.
    pub fn wait_for(&self, error: &SpotifyError, backoff: Duration) -> Duration {
        match error {
            SpotifyError::RateLimited {
                retry_after: Some(hint),
            } => *hint,
            _ => backoff,
        }
    }

    pub fn next_backoff(&self, backoff: Duration) -> Duration {
        (backoff * 2).min(self.max_delay)
    }
}

/// Rate-limited Spotify Web API client.
///
/// Every outbound call waits on a shared requests-per-second quota, then
/// retries transient failures (5xx, 429, transport errors) under the
/// [`RetryPolicy`]. 401 surfaces immediately as [`SpotifyError::Unauthorized`]
/// so the caller can refresh and retry its unit of work; other 4xx are
/// permanent.
pub struct SpotifyClient {
    http: reqwest::Client,
    limiter: DirectRateLimiter,
    token: RwLock<String>,
    credentials: SpotifyCredentials,
    retry: RetryPolicy,
}

impl SpotifyClient {
    /// Build a client and acquire an initial access token.
    pub async fn connect(
        credentials: SpotifyCredentials,
        requests_per_second: u32,
        retry: RetryPolicy,
    ) -> Result<Self, SpotifyError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        let token = auth::fetch_access_token(&http, &credentials).await?;
        tracing::debug!("Acquired initial Spotify access token");

        let quota = Quota::per_second(
            NonZeroU32::new(requests_per_second.max(1)).unwrap_or(NonZeroU32::MIN),
        );

        Ok(Self {
            http,
            limiter: RateLimiter::direct(quota),
            token: RwLock::new(token),
            credentials,
            retry,
        })
    }

    /// One classified attempt: wait on the rate limiter, send, map the
    /// response status onto the error taxonomy.
    async fn send_classified<F>(&self, build: &F) -> Result<reqwest::Response, SpotifyError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        self.limiter.until_ready().await;

        let token = self.token.read().await.clone();
        let response = build(&self.http).bearer_auth(&token).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match status.as_u16() {
            401 => Err(SpotifyError::Unauthorized),
            429 => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(SpotifyError::RateLimited { retry_after })
            }
            status_code if status.is_server_error() => Err(SpotifyError::Server {
                status: status_code,
            }),
            status_code => Err(SpotifyError::Rejected {
                status: status_code,
            }),
        }
    }

    /// Send a request, retrying transient failures with bounded exponential
    /// backoff.
    async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response, SpotifyError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        retry_transient(&self.retry, || self.send_classified(&build)).await
    }

    /// GET a JSON document. An unreadable body counts against the same
    /// retry budget as a transport failure, so one logical call never makes
    /// more than `max_attempts` requests.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, SpotifyError> {
        retry_transient(&self.retry, || async move {
            let response = self
                .send_classified(&|http: &reqwest::Client| http.get(url))
                .await?;
            response
                .json::<T>()
                .await
                .map_err(|err| SpotifyError::MalformedResponse(err.to_string()))
        })
        .await
    }
}

/// Drive `attempt` until it succeeds, fails permanently or the retry budget
/// runs out. All retryable failure kinds share the one attempt counter.
async fn retry_transient<T, F, Fut>(
    retry: &RetryPolicy,
    mut attempt: F,
) -> Result<T, SpotifyError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SpotifyError>>,
{
    let mut backoff = retry.base_delay;
    let mut attempts = 0;

    loop {
        let error = match attempt().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() => error,
            Err(error) => return Err(error),
        };

        attempts += 1;
        if attempts >= retry.max_attempts {
            return Err(SpotifyError::RetriesExhausted(Box::new(error)));
        }

        let wait = retry.wait_for(&error, backoff);
        tracing::warn!(
            error = %error,
            attempts,
            wait_secs = wait.as_secs_f64(),
            "Transient Spotify failure, backing off"
        );
        tokio::time::sleep(wait).await;
        backoff = retry.next_backoff(backoff);
    }
}

/// Decode a search body into candidates. A garbled body is treated as zero
/// candidates rather than a failed run; the entry lands on the not-found
/// path and can be reset later.
fn parse_search_candidates(body: &str, query: &str) -> Vec<SearchCandidate> {
    let parsed: SearchResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::warn!(error = %err, query, "Malformed search response, treating as no candidates");
            return Vec::new();
        }
    };

    let items = parsed.tracks.map(|page| page.items).unwrap_or_default();
    items
        .into_iter()
        .map(|track| {
            let (artist_id, artist_name) = track
                .artists
                .into_iter()
                .next()
                .map(|artist| (artist.id, artist.name))
                .unwrap_or((None, String::new()));
            let (album_id, album_name) = track
                .album
                .map(|album| (album.id, album.name))
                .unwrap_or((None, String::new()));
            SearchCandidate {
                track_id: track.id,
                track_name: track.name,
                artist_id,
                artist_name,
                album_id,
                album_name,
            }
        })
        .collect()
}

/// Follow `next` cursors until the final page. Any failed page aborts the
/// whole listing so callers never act on a partial membership view.
async fn collect_playlist_pages<F, Fut>(
    first_url: String,
    fetch: F,
) -> Result<HashSet<String>, SpotifyError>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<PlaylistTracksPage, SpotifyError>>,
{
    let mut track_ids = HashSet::new();
    let mut next_url = Some(first_url);

    while let Some(url) = next_url {
        let page = fetch(url).await?;
        track_ids.extend(
            page.items
                .into_iter()
                .filter_map(|item| item.track.and_then(|track| track.id)),
        );
        next_url = page.next;
    }

    Ok(track_ids)
}

#[derive(Serialize)]
struct CreatePlaylistBody<'a> {
    name: &'a str,
    description: &'a str,
    public: bool,
}

#[derive(Serialize)]
struct AddTracksBody {
    uris: Vec<String>,
}

#[derive(Serialize)]
struct UpdateDescriptionBody<'a> {
    description: &'a str,
}

#[async_trait::async_trait]
impl SpotifyApi for SpotifyClient {
    async fn search_tracks(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<SearchCandidate>, SpotifyError> {
        let url = format!(
            "{API_BASE}/search?q={}&type=track&limit={limit}",
            urlencoding::encode(query)
        );

        let response = self.send_with_retry(|http| http.get(&url)).await?;
        let body = response.text().await?;
        Ok(parse_search_candidates(&body, query))
    }

    async fn create_playlist(
        &self,
        name: &str,
        description: &str,
    ) -> Result<String, SpotifyError> {
        let url = format!("{API_BASE}/users/{}/playlists", self.credentials.user_id);
        let body = CreatePlaylistBody {
            name,
            description,
            public: true,
        };

        let response = self
            .send_with_retry(|http| http.post(&url).json(&body))
            .await?;

        let created: CreatedPlaylist = response
            .json()
            .await
            .map_err(|err| SpotifyError::MalformedResponse(err.to_string()))?;

        tracing::info!(playlist_id = %created.id, name, "Created Spotify playlist");
        Ok(created.id)
    }

    async fn playlist_track_ids(
        &self,
        playlist_id: &str,
    ) -> Result<HashSet<String>, SpotifyError> {
        let first_url = format!("{API_BASE}/playlists/{playlist_id}/tracks?limit=100");
        collect_playlist_pages(first_url, |url| async move { self.get_json(&url).await }).await
    }

    async fn add_tracks(
        &self,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<(), SpotifyError> {
        let url = format!("{API_BASE}/playlists/{playlist_id}/tracks");
        let body = AddTracksBody {
            uris: track_ids
                .iter()
                .map(|id| format!("spotify:track:{id}"))
                .collect(),
        };

        self.send_with_retry(|http| http.post(&url).json(&body))
            .await?;

        tracing::debug!(playlist_id, count = track_ids.len(), "Appended tracks");
        Ok(())
    }

    async fn update_description(
        &self,
        playlist_id: &str,
        description: &str,
    ) -> Result<(), SpotifyError> {
        let url = format!("{API_BASE}/playlists/{playlist_id}");
        let body = UpdateDescriptionBody { description };

        self.send_with_retry(|http| http.put(&url).json(&body))
            .await?;

        Ok(())
    }

    async fn refresh_access_token(&self) -> Result<(), SpotifyError> {
        let token = auth::fetch_access_token(&self.http, &self.credentials).await?;
        *self.token.write().await = token;
        tracing::info!("Refreshed Spotify access token");
        Ok(())
    }
}
