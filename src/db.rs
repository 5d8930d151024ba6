use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};

/// Connects to PostgreSQL and applies the embedded migrations.
pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .context("run database migrations")?;
    tracing::info!("database ready");

    Ok(db)
}
