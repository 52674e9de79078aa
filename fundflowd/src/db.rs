//! Database CLI subcommands for fundflowd.
//!
//! Provides `db migrate`, `db status`, and `db init` commands.

use anyhow::{anyhow, Result};
use std::env;
use tracing::info;

use fundflow_db::{init_demo_data, migrate, status};
use fundflow_domain::Currency;

/// Run database CLI subcommands.
///
/// Supported commands:
/// - `fundflowd db migrate` - Run pending migrations
/// - `fundflowd db status` - Check migration status
/// - `fundflowd db init [--currency CODE]` - Seed demo users and accounts
pub async fn run_db_command(args: &[String]) -> Result<()> {
    let command = args
        .get(2)
        .ok_or_else(|| anyhow!("Usage: fundflowd db <migrate|status|init> [options]"))?;

    // Parse before connecting so usage errors don't need a database
    let currency = match command.as_str() {
        "migrate" | "status" => None,
        "init" => Some(parse_init_options(&args[3..])?),
        other => {
            return Err(anyhow!("Unknown db command: {}. Use migrate, status, or init", other));
        },
    };

    let database_url = env::var("DATABASE_URL")
        .map_err(|_| anyhow!("DATABASE_URL environment variable is required for db commands"))?;
    let pool = sqlx::PgPool::connect(&database_url).await?;

    match (command.as_str(), currency) {
        ("migrate", _) => migrate(&pool).await?,
        ("status", _) => status(&pool).await?,
        (_, Some(currency)) => {
            let demo = init_demo_data(&pool, currency.code()).await?;
            info!(
                alice_account = %demo.alice_account,
                bob_account = %demo.bob_account,
                "Initialized demo data"
            );
        },
        (other, None) => return Err(anyhow!("Unknown db command: {}", other)),
    }

    Ok(())
}

fn parse_init_options(options: &[String]) -> Result<Currency> {
    let mut currency = Currency::inr();

    let mut rest = options.iter();
    while let Some(option) = rest.next() {
        match option.as_str() {
            "--currency" => {
                let code = rest.next().ok_or_else(|| anyhow!("--currency requires a value"))?;
                currency = Currency::new(code)?;
            },
            other => return Err(anyhow!("Unknown option: {}", other)),
        }
    }

    Ok(currency)
}
