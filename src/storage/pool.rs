//! SQLite pool for the certificate store.

use crate::config::DatabaseConfig;
use crate::errors::{CertsError, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Pool, Sqlite,
};
use std::{str::FromStr, time::Duration};

pub type DbPool = Pool<Sqlite>;

const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open the certificate store, running migrations when enabled.
///
/// An in-memory database lives only as long as its connection, so a
/// `:memory:` URL gets a single connection that is never recycled.
pub async fn create_pool(config: &DatabaseConfig) -> Result<DbPool> {
    validate_config(config)?;

    let connect_options = SqliteConnectOptions::from_str(&config.url)
        .map_err(|e| {
            CertsError::persistence(format!("Invalid SQLite connection string: {}", config.url), e)
        })?
        .create_if_missing(true)
        .busy_timeout(SQLITE_BUSY_TIMEOUT)
        .foreign_keys(true);

    let (pool_options, connect_options) = if config.is_memory() {
        let options = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
        (options, connect_options)
    } else {
        let options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .idle_timeout(config.idle_timeout());
        (options, connect_options.journal_mode(SqliteJournalMode::Wal))
    };

    let pool = pool_options
        .acquire_timeout(config.connect_timeout())
        .test_before_acquire(true)
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            tracing::error!(
                error = %e,
                url = %config.url,
                busy_timeout_ms = SQLITE_BUSY_TIMEOUT.as_millis(),
                "Certificate store unreachable"
            );
            CertsError::persistence(format!("Failed to connect to database: {}", config.url), e)
        })?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        in_memory = config.is_memory(),
        "Certificate store opened"
    );

    if config.auto_migrate {
        super::migrations::run_migrations(&pool).await?;
    }

    Ok(pool)
}

fn validate_config(config: &DatabaseConfig) -> Result<()> {
    if config.max_connections == 0 || config.min_connections > config.max_connections {
        return Err(CertsError::config(format!(
            "invalid pool bounds: min {} max {}",
            config.min_connections, config.max_connections
        )));
    }

    if !config.url.starts_with("sqlite:") {
        return Err(CertsError::config("database URL must start with 'sqlite:'"));
    }

    Ok(())
}
