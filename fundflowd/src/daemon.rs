//! Main daemon runtime.
//!
//! The daemon wires together:
//! 1. Account store, ledger and user projection (memory or PostgreSQL)
//! 2. Idempotency guard and transfer engine
//! 3. Projection worker fed by the identity event intake
//! 4. API server
//!
//! Shutdown is driven by one cancellation token shared by every task.

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fundflow_engine::TransferEngine;
use fundflow_projector::UserEvent;
use fundflow_store::{
    AccountStore, IdempotencyGuard, LedgerReader, MemoryIdempotencyGuard, MemoryStore,
    UserDirectory, UserProjection,
};
#[cfg(feature = "postgres")]
use fundflow_store::{PgIdempotencyGuard, PgStore, StoreError};

use crate::api::{create_router, ApiState};
use crate::config::{Config, Environment};
use crate::error::{DaemonError, DaemonResult};
use crate::projection_worker::ProjectionWorker;

// =============================================================================
// Components
// =============================================================================

/// Storage ports the daemon runs on.
#[derive(Clone)]
pub struct Components {
    pub accounts: Arc<dyn AccountStore>,
    pub ledger: Arc<dyn LedgerReader>,
    pub users: Arc<dyn UserDirectory>,
    pub projection: Arc<dyn UserProjection>,
    pub guard: Arc<dyn IdempotencyGuard>,
    /// Expired idempotency markers that need periodic purging
    #[cfg(feature = "postgres")]
    pub janitor: Option<PgIdempotencyGuard>,
}

impl Components {
    /// In-memory components, for tests and local development.
    pub fn memory(store: MemoryStore, guard: MemoryIdempotencyGuard) -> Self {
        let store = Arc::new(store);
        Self {
            accounts: store.clone(),
            ledger: store.clone(),
            users: store.clone(),
            projection: store,
            guard: Arc::new(guard),
            #[cfg(feature = "postgres")]
            janitor: None,
        }
    }

    /// PostgreSQL-backed components.
    #[cfg(feature = "postgres")]
    pub fn postgres(store: PgStore, guard: PgIdempotencyGuard) -> Self {
        let store = Arc::new(store);
        Self {
            accounts: store.clone(),
            ledger: store.clone(),
            users: store.clone(),
            projection: store,
            guard: Arc::new(guard.clone()),
            janitor: Some(guard),
        }
    }
}

// =============================================================================
// Daemon
// =============================================================================

/// Main daemon runtime.
pub struct Daemon {
    config: Config,
    components: Components,
    state: Arc<ApiState>,
    user_events: mpsc::Receiver<UserEvent>,
    shutdown: CancellationToken,
}

/// Handle to a started daemon.
pub struct DaemonHandle {
    api_addr: SocketAddr,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Daemon {
    /// Create a daemon over the given components.
    pub fn new(config: Config, components: Components) -> Self {
        let engine = TransferEngine::new(
            components.accounts.clone(),
            components.users.clone(),
            components.guard.clone(),
        );
        let (sender, user_events) = mpsc::channel(config.sync.queue_capacity.max(1));

        let state = Arc::new(ApiState {
            engine,
            accounts: components.accounts.clone(),
            ledger: components.ledger.clone(),
            users: components.users.clone(),
            user_events: sender,
            auth_header: config.api.auth_header.clone(),
            default_currency: config.transfer.default_currency.clone(),
        });

        Self {
            config,
            components,
            state,
            user_events,
            shutdown: CancellationToken::new(),
        }
    }

    /// Create a daemon over a fresh in-memory store.
    pub fn new_memory(config: Config) -> Self {
        let store = MemoryStore::with_lock_timeout(config.transfer.lock_timeout);
        Self::with_memory_store(config, store)
    }

    /// Create a daemon over an existing in-memory store.
    pub fn with_memory_store(config: Config, store: MemoryStore) -> Self {
        let guard = MemoryIdempotencyGuard::new(config.transfer.idempotency_ttl);
        Self::new(config, Components::memory(store, guard))
    }

    /// Create a daemon over PostgreSQL.
    #[cfg(feature = "postgres")]
    pub async fn connect_postgres(config: Config, database_url: &str) -> DaemonResult<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(StoreError::from)?;

        let store = PgStore::new(pool.clone(), config.transfer.lock_timeout);
        let guard = PgIdempotencyGuard::new(pool, config.transfer.idempotency_ttl);
        info!("Connected to PostgreSQL");
        Ok(Self::new(config, Components::postgres(store, guard)))
    }

    /// Pick the backend the configuration asks for.
    pub async fn from_config(config: Config) -> DaemonResult<Self> {
        #[cfg(feature = "postgres")]
        {
            if let Some(url) = config.database_url.clone() {
                return Self::connect_postgres(config, &url).await;
            }
        }

        if config.environment == Environment::Production {
            warn!("Running production on the in-memory store, nothing will be durable");
        } else if config.database_url.is_some() {
            warn!("DATABASE_URL set but PostgreSQL support is not compiled in, using memory store");
        }
        Ok(Self::new_memory(config))
    }

    /// Router over this daemon's state, without starting anything.
    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Token that stops every task of this daemon when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start the projection worker and API server.
    pub async fn start(self) -> DaemonResult<DaemonHandle> {
        let mut tasks = Vec::new();

        let worker = ProjectionWorker::new(self.components.projection.clone(), self.user_events);
        tasks.push(tokio::spawn(worker.run(self.shutdown.clone())));

        #[cfg(feature = "postgres")]
        {
            if let Some(guard) = self.components.janitor.clone() {
                let every = self.config.transfer.idempotency_ttl;
                let shutdown = self.shutdown.clone();
                tasks.push(tokio::spawn(purge_idempotency_keys(guard, every, shutdown)));
            }
        }

        let router = create_router(self.state);
        let (api_addr, server) =
            match start_api_server(&self.config, router, self.shutdown.clone()).await {
                Ok(started) => started,
                Err(e) => {
                    self.shutdown.cancel();
                    return Err(e);
                },
            };
        tasks.push(server);
        info!(%api_addr, "API server started");

        Ok(DaemonHandle {
            api_addr,
            shutdown: self.shutdown,
            tasks,
        })
    }

    /// Run the daemon.
    ///
    /// This method blocks until shutdown is requested (SIGINT).
    pub async fn run(self) -> DaemonResult<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            "Starting Fundflow daemon"
        );

        let shutdown = self.shutdown.clone();
        let handle = self.start().await?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
            _ = shutdown.cancelled() => info!("Shutdown requested"),
        }

        handle.shutdown().await;
        Ok(())
    }
}

impl DaemonHandle {
    /// Address the API server is listening on.
    pub fn api_addr(&self) -> SocketAddr {
        self.api_addr
    }

    /// Graceful shutdown: stop intake, finish in-flight requests, drain the
    /// projection queue.
    pub async fn shutdown(self) {
        info!("Initiating graceful shutdown");
        self.shutdown.cancel();

        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Daemon task failed during shutdown");
            }
        }
        info!("Shutdown complete");
    }
}

/// Bind the listener and spawn the server task.
async fn start_api_server(
    config: &Config,
    router: Router,
    shutdown: CancellationToken,
) -> DaemonResult<(SocketAddr, JoinHandle<()>)> {
    let addr = format!("{}:{}", config.api.host, config.api.port);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| DaemonError::Server(format!("Failed to bind to {}: {}", addr, e)))?;

    let local_addr = listener
        .local_addr()
        .map_err(|e| DaemonError::Server(format!("Failed to get local address: {}", e)))?;

    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            error!(error = %e, "API server error");
        }
    });

    Ok((local_addr, server))
}

#[cfg(feature = "postgres")]
async fn purge_idempotency_keys(
    guard: PgIdempotencyGuard,
    every: std::time::Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await; // First tick is immediate

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => match guard.purge_expired().await {
                Ok(0) => {},
                Ok(purged) => tracing::debug!(purged, "Expired idempotency keys purged"),
                Err(e) => warn!(error = %e, "Idempotency key purge failed (will retry)"),
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
