//! Fundflow Daemon Library
//!
//! Runtime for the funds transfer engine.
//!
//! # Architecture
//!
//! ```text
//! Gateway → API Server → TransferEngine → UnitOfWork (row locks) → Store
//!               │              └──────→ IdempotencyGuard
//!               └─ user events → Projection Worker → User Projection
//! ```
//!
//! # Components
//!
//! - **Daemon**: Wires storage, engine, worker and server; owns shutdown
//! - **API**: HTTP endpoints for transfers, accounts and identity events
//! - **Projection Worker**: Applies identity events to the user projection
//! - **Config**: Environment-based configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use fundflowd::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let daemon = Daemon::from_config(config).await?;
//!     daemon.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod daemon;
pub mod error;
pub mod projection_worker;

#[cfg(feature = "postgres")]
pub mod db;

// Re-exports for convenience
pub use api::{create_router, ApiState};
pub use config::{ApiConfig, Config, Environment, LogFormat, SyncConfig, TransferConfig};
pub use daemon::{Components, Daemon, DaemonHandle};
pub use error::{DaemonError, DaemonResult};
pub use projection_worker::ProjectionWorker;
