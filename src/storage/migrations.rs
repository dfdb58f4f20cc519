//! # Database Migration Management
//!
//! SQL migrations under `migrations/` are embedded at compile time and applied
//! in version order; sqlx tracks what has run in `_sqlx_migrations`.

use crate::errors::{CertsError, Result};
use crate::storage::DbPool;
use sqlx::migrate::Migrator;
use tracing::{error, info};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply all pending migrations
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    info!(available = MIGRATOR.iter().count(), "Starting database migration process");

    MIGRATOR.run(pool).await.map_err(|e| {
        error!(error = %e, "Database migration failed");
        CertsError::persistence("Failed to run database migrations", sqlx::Error::Migrate(Box::new(e)))
    })?;

    info!("Database migrations complete");
    Ok(())
}
