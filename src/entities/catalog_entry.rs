use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue::Set};
use serde::{Deserialize, Serialize};

/// Match lifecycle of a scraped catalog tuple. An entry only ever leaves
/// `Matched` or `NotFound` through an explicit reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum MatchStatus {
    #[sea_orm(string_value = "unmatched")]
    Unmatched,
    #[sea_orm(string_value = "matched")]
    Matched,
    #[sea_orm(string_value = "not_found")]
    NotFound,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "catalog_entries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub genre: String,
    pub artist: String,
    pub album: Option<String>,
    pub track: String,
    pub status: MatchStatus,
    /// Present iff status = Matched, together with the other ids and confidence.
    pub spotify_track_id: Option<String>,
    pub spotify_artist_id: Option<String>,
    pub spotify_album_id: Option<String>,
    pub confidence: Option<i32>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    fn new() -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            created_at: Set(now),
            updated_at: Set(now),
            ..ActiveModelTrait::default()
        }
    }

    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, sea_orm::DbErr>
    where
        C: ConnectionTrait,
    {
        if !insert {
            self.updated_at = Set(chrono::Utc::now().timestamp());
        }
        Ok(self)
    }
}
