//! Database lifecycle management for Fundflow.
//!
//! Provides migration running, status checking, and demo data seeding.

mod init;

pub use init::{init_demo_data, DemoData};

use sqlx::{PgPool, Row};
use tracing::{info, warn};

/// Result type for DB operations.
pub type Result<T> = std::result::Result<T, anyhow::Error>;

/// Run all pending migrations.
///
/// Uses sqlx migrations from the workspace `migrations/` directory.
/// Idempotent: safe to run multiple times.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    sqlx::migrate!("../migrations").run(pool).await?;

    info!("Migrations completed successfully");
    Ok(())
}

/// Check database connectivity and migration status.
///
/// Logs the applied migrations, newest first.
pub async fn status(pool: &PgPool) -> Result<()> {
    let result: i64 = sqlx::query_scalar("SELECT 1::BIGINT").fetch_one(pool).await?;
    if result != 1 {
        return Err(anyhow::anyhow!("Database connectivity check failed"));
    }

    info!("Database connectivity: OK");

    // Runtime query: sqlx::query! would require a database at compile time
    let rows = sqlx::query(
        r#"
        SELECT version, description, installed_on::TEXT AS installed_on, success
        FROM _sqlx_migrations
        ORDER BY version DESC
        LIMIT 10
        "#,
    )
    .fetch_all(pool)
    .await;

    match rows {
        Ok(migs) if !migs.is_empty() => {
            info!("Applied migrations:");
            for mig in migs {
                let version: i64 = mig.try_get("version")?;
                let description: String = mig.try_get("description")?;
                let installed_on: Option<String> = mig.try_get("installed_on")?;
                let success: bool = mig.try_get("success")?;

                info!(
                    "  {} v{}: {} ({})",
                    if success { "ok" } else { "FAILED" },
                    version,
                    description,
                    installed_on.unwrap_or_else(|| "N/A".to_string())
                );
            }
        },
        Ok(_) => {
            warn!("No migrations found in database (run `fundflowd db migrate` first)");
        },
        Err(e) => {
            // Table does not exist before the first migrate
            if e.to_string().contains("_sqlx_migrations") {
                warn!("Migration table not found (run `fundflowd db migrate` first)");
            } else {
                return Err(e.into());
            }
        },
    }

    let accounts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
        .fetch_one(pool)
        .await
        .unwrap_or(0);
    let transfers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transfers")
        .fetch_one(pool)
        .await
        .unwrap_or(0);
    info!(accounts, transfers, "Ledger row counts");

    Ok(())
}
