//! Daemon configuration.
//!
//! Loads configuration from environment variables (and `.env`) with
//! defaults suitable for local development.

use crate::error::{DaemonError, DaemonResult};
use axum::http::HeaderName;
use fundflow_domain::Currency;
use std::env;
use std::time::Duration;

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// Transfer engine configuration
    pub transfer: TransferConfig,

    /// User projection sync configuration
    pub sync: SyncConfig,

    /// Log output format
    pub log_format: LogFormat,

    /// PostgreSQL connection string (memory store when absent)
    pub database_url: Option<String>,

    /// Environment (test, development, production)
    pub environment: Environment,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Header carrying the authenticated caller's email, set by the gateway
    pub auth_header: HeaderName,
}

/// Transfer engine configuration.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Bounded wait for an account row lock
    pub lock_timeout: Duration,
    /// How long an idempotency key is remembered
    pub idempotency_ttl: Duration,
    /// Currency for accounts opened without one
    pub default_currency: Currency,
}

/// User projection sync configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Capacity of the queue between the HTTP intake and the worker
    pub queue_capacity: usize,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment (memory store)
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> DaemonResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = load_environment(&lookup)?;
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        if cfg!(feature = "postgres")
            && environment != Environment::Test
            && database_url.is_none()
        {
            return Err(DaemonError::Config(format!(
                "DATABASE_URL is required in the {} environment",
                environment
            )));
        }

        Ok(Self {
            api: load_api_config(&lookup)?,
            transfer: load_transfer_config(&lookup)?,
            sync: SyncConfig {
                queue_capacity: load_number(&lookup, "FUNDFLOW_USER_EVENT_QUEUE", 1024)?,
            },
            log_format: LogFormat::from_lookup(&lookup)?,
            database_url,
            environment,
        })
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
                auth_header: HeaderName::from_static(DEFAULT_AUTH_HEADER),
            },
            transfer: TransferConfig {
                lock_timeout: Duration::from_millis(500),
                ..TransferConfig::default()
            },
            sync: SyncConfig { queue_capacity: 64 },
            log_format: LogFormat::Text,
            database_url: None,
            environment: Environment::Test,
        }
    }
}

const DEFAULT_AUTH_HEADER: &str = "x-authenticated-user";

fn load_environment(lookup: &impl Fn(&str) -> Option<String>) -> DaemonResult<Environment> {
    let env_str = lookup("FUNDFLOW_ENV").unwrap_or_else(|| "development".to_string());

    match env_str.to_lowercase().as_str() {
        "test" => Ok(Environment::Test),
        "development" | "dev" => Ok(Environment::Development),
        "production" | "prod" => Ok(Environment::Production),
        other => Err(DaemonError::Config(format!(
            "Invalid FUNDFLOW_ENV: {}. Expected: test, development, production",
            other
        ))),
    }
}

fn load_api_config(lookup: &impl Fn(&str) -> Option<String>) -> DaemonResult<ApiConfig> {
    let host = lookup("FUNDFLOW_API_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
    let port = load_number(lookup, "FUNDFLOW_API_PORT", 8080u16)?;

    let header = lookup("FUNDFLOW_AUTH_HEADER").unwrap_or_else(|| DEFAULT_AUTH_HEADER.to_string());
    let auth_header = HeaderName::from_bytes(header.trim().to_lowercase().as_bytes())
        .map_err(|_| DaemonError::Config(format!("Invalid FUNDFLOW_AUTH_HEADER: {}", header)))?;

    Ok(ApiConfig { host, port, auth_header })
}

fn load_transfer_config(lookup: &impl Fn(&str) -> Option<String>) -> DaemonResult<TransferConfig> {
    let lock_timeout_ms = load_number(lookup, "FUNDFLOW_LOCK_TIMEOUT_MS", 5_000u64)?;
    let ttl_secs = load_number(lookup, "FUNDFLOW_IDEMPOTENCY_TTL_SECS", 60u64)?;

    if lock_timeout_ms == 0 {
        return Err(DaemonError::Config("FUNDFLOW_LOCK_TIMEOUT_MS must be positive".into()));
    }
    if ttl_secs == 0 {
        return Err(DaemonError::Config("FUNDFLOW_IDEMPOTENCY_TTL_SECS must be positive".into()));
    }

    let currency = lookup("FUNDFLOW_DEFAULT_CURRENCY").unwrap_or_else(|| "INR".to_string());
    let default_currency = Currency::new(&currency).map_err(|e| {
        DaemonError::Config(format!("Invalid FUNDFLOW_DEFAULT_CURRENCY {}: {}", currency, e))
    })?;

    Ok(TransferConfig {
        lock_timeout: Duration::from_millis(lock_timeout_ms),
        idempotency_ttl: Duration::from_secs(ttl_secs),
        default_currency,
    })
}

fn load_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> DaemonResult<T> {
    match lookup(key) {
        Some(val) => val
            .trim()
            .parse::<T>()
            .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
        None => Ok(default),
    }
}

impl LogFormat {
    /// Read `FUNDFLOW_LOG_FORMAT` from the process environment.
    ///
    /// Used before the rest of the configuration so that configuration
    /// errors are already logged in the right format.
    pub fn from_env() -> DaemonResult<Self> {
        Self::from_lookup(&|key: &str| env::var(key).ok())
    }

    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> DaemonResult<Self> {
        match lookup("FUNDFLOW_LOG_FORMAT").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("text") | Some("pretty") => Ok(LogFormat::Text),
            Some("json") => Ok(LogFormat::Json),
            Some(other) => Err(DaemonError::Config(format!(
                "Invalid FUNDFLOW_LOG_FORMAT: {}. Expected: text, json",
                other
            ))),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            idempotency_ttl: Duration::from_secs(60),
            default_currency: Currency::inr(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                auth_header: HeaderName::from_static(DEFAULT_AUTH_HEADER),
            },
            transfer: TransferConfig::default(),
            sync: SyncConfig { queue_capacity: 1024 },
            log_format: LogFormat::Text,
            database_url: None,
            environment: Environment::Development,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
