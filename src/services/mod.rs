pub mod matcher;
pub mod playlist_sync;
