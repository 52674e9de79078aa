//! Fundflow Daemon
//!
//! Serves the transfer API and keeps the user projection in sync.
//!
//! # Usage
//!
//! ```bash
//! # Start with default configuration (in-memory store)
//! cargo run -p fundflowd
//!
//! # Start against PostgreSQL
//! DATABASE_URL=postgres://localhost/fundflow cargo run -p fundflowd --features postgres
//!
//! # Manage the schema
//! cargo run -p fundflowd --features postgres -- db migrate
//! ```
//!
//! # Environment Variables
//!
//! - `FUNDFLOW_ENV`: Environment (test, development, production)
//! - `FUNDFLOW_API_HOST`: API host (default: 0.0.0.0)
//! - `FUNDFLOW_API_PORT`: API port (default: 8080)
//! - `FUNDFLOW_AUTH_HEADER`: Caller email header (default: x-authenticated-user)
//! - `FUNDFLOW_LOCK_TIMEOUT_MS`: Account lock wait (default: 5000)
//! - `FUNDFLOW_IDEMPOTENCY_TTL_SECS`: Idempotency key lifetime (default: 60)
//! - `FUNDFLOW_DEFAULT_CURRENCY`: Currency for new accounts (default: INR)
//! - `FUNDFLOW_USER_EVENT_QUEUE`: Identity event queue capacity (default: 1024)
//! - `FUNDFLOW_LOG_FORMAT`: text or json (default: text)
//! - `DATABASE_URL`: PostgreSQL connection string (`postgres` feature)

use fundflowd::{Config, Daemon, LogFormat};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing(LogFormat::from_env()?)?;

    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("db") {
        return run_db(&args).await;
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        api_host = %config.api.host,
        api_port = config.api.port,
        persistent = config.database_url.is_some(),
        "Fundflow Daemon"
    );

    // Create and run daemon
    let daemon = Daemon::from_config(config).await?;
    daemon.run().await?;

    Ok(())
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let mut filter = EnvFilter::from_default_env();
    for directive in [
        "fundflowd=info",
        "fundflow_engine=info",
        "fundflow_store=info",
        "fundflow_projector=info",
        "fundflow_db=info",
        "tower_http=info",
    ] {
        filter = filter.add_directive(directive.parse()?);
    }

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
    Ok(())
}

#[cfg(feature = "postgres")]
async fn run_db(args: &[String]) -> anyhow::Result<()> {
    fundflowd::db::run_db_command(args).await
}

#[cfg(not(feature = "postgres"))]
async fn run_db(_args: &[String]) -> anyhow::Result<()> {
    anyhow::bail!("db commands require fundflowd built with --features postgres")
}
