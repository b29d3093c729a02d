use crate::error::StorageError;
use configuration::DatabaseSettings;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::env;
use std::time::Duration;

/// Establishes a connection pool to the PostgreSQL database.
///
/// The URL comes from `database.url` when configured, otherwise from
/// `DATABASE_URL` (a `.env` file is honoured if present). The pool is shared
/// by every stage of the pipeline.
pub async fn connect(settings: &DatabaseSettings) -> Result<PgPool, StorageError> {
    let database_url = match &settings.url {
        Some(url) => url.clone(),
        None => {
            // A missing .env file is fine when the variable is exported directly.
            let _ = dotenvy::dotenv();
            env::var("DATABASE_URL").map_err(|_| {
                StorageError::ConnectionConfig("DATABASE_URL must be set.".to_string())
            })?
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections.min(settings.max_connections))
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .connect(&database_url)
        .await?;

    tracing::info!(max_connections = settings.max_connections, "Connected to database.");
    Ok(pool)
}

/// Applies the embedded schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StorageError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
