use serde::{Deserialize, Serialize};

use crate::ports::spotify::SpotifyError;
use crate::spotify::types::TokenResponse;

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
    /// Long-lived refresh token from the one-off authorization flow. Without
    /// it only the client-credentials grant is available, which cannot write
    /// playlists.
    pub refresh_token: Option<String>,
    /// Spotify user id owning the playlists.
    pub user_id: String,
}

/// Fetch an access token, preferring the refresh-token grant and falling back
/// to client credentials.
pub async fn fetch_access_token(
    http: &reqwest::Client,
    credentials: &SpotifyCredentials,
) -> Result<String, SpotifyError> {
    if let Some(refresh_token) = &credentials.refresh_token {
        match request_token(
            http,
            credentials,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
        )
        .await
        {
            Ok(token) => return Ok(token),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "Refresh-token grant failed, falling back to client credentials"
                );
            }
        }
    }

    request_token(http, credentials, &[("grant_type", "client_credentials")]).await
}

async fn request_token(
    http: &reqwest::Client,
    credentials: &SpotifyCredentials,
    form: &[(&str, &str)],
) -> Result<String, SpotifyError> {
    let response = http
        .post(TOKEN_URL)
        .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
        .form(form)
        .send()
        .await?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(SpotifyError::Unauthorized);
    }
    if !status.is_success() {
        return Err(SpotifyError::Rejected {
            status: status.as_u16(),
        });
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|err| SpotifyError::MalformedResponse(err.to_string()))?;

    token.access_token.ok_or(SpotifyError::MissingAccessToken)
}
