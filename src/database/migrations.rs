//! Database Migrations
//!
//! Embedded SQL migrations from `migrations/`, applied with refinery.

use anyhow::{Context, Result};
use deadpool_postgres::Pool;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Run all pending migrations
pub async fn run_migrations(pool: &Pool) -> Result<()> {
    tracing::info!("🔄 Running database migrations...");

    let mut client = pool
        .get()
        .await
        .context("Failed to get connection for migrations")?;

    let report = embedded::migrations::runner()
        .run_async(&mut **client)
        .await
        .context("Failed to apply database migrations")?;

    for migration in report.applied_migrations() {
        tracing::info!("Applied migration {}", migration);
    }

    tracing::info!("✅ Database migrations completed successfully");
    Ok(())
}
