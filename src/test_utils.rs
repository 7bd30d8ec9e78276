use std::sync::Arc;

use migration::MigratorTrait;
use sea_orm::Database as SeaDatabase;

use crate::database::Database;

pub async fn test_db() -> Arc<Database> {
    let conn = SeaDatabase::connect("sqlite::memory:").await.unwrap();

    migration::Migrator::up(&conn, None).await.unwrap();

    Arc::new(Database { conn })
}
