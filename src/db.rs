use anyhow::Context;
use sqlx::{migrate::Migrator, postgres::PgPoolOptions, PgPool};
use tracing::info;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("connect to database")
}

pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    MIGRATOR.run(pool).await.context("apply migrations")?;
    info!("migrations applied");
    Ok(())
}

/// Reverts every applied migration.
pub async fn rollback(pool: &PgPool) -> anyhow::Result<()> {
    MIGRATOR.undo(pool, 0).await.context("revert migrations")?;
    info!("migrations reverted");
    Ok(())
}
