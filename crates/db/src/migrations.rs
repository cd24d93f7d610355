use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Number of forward migrations embedded in this build.
pub fn expected_count() -> usize {
    MIGRATOR.iter().filter(|migration| !migration.migration_type.is_down_migration()).count()
}

/// Number of migrations recorded as successfully applied.
pub async fn applied_count(pool: &DbPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
        .fetch_one(pool)
        .await
}
