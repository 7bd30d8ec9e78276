use serde::Deserialize;

/// Spotify OAuth token response. `access_token` is optional so an error body
/// that still parses doesn't masquerade as success.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
}

/// Search response: `/v1/search?type=track`
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    pub tracks: Option<SearchTracksPage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchTracksPage {
    #[serde(default)]
    pub items: Vec<TrackObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackObject {
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<ArtistObject>,
    pub album: Option<AlbumObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtistObject {
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlbumObject {
    pub id: Option<String>,
    pub name: String,
}

/// Playlist creation response: only the id is consumed.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedPlaylist {
    pub id: String,
}

/// One page of playlist membership. `next` is a complete cursor URL; absent on
/// the final page.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistTracksPage {
    #[serde(default)]
    pub items: Vec<PlaylistItem>,
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistItem {
    pub track: Option<PlaylistTrackRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistTrackRef {
    pub id: Option<String>,
}
