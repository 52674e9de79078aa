//! Projection worker: applies queued identity events to the user projection.
//!
//! Events arrive through a bounded channel fed by the HTTP intake. On
//! shutdown the worker stops taking new events but applies whatever is
//! already queued.

use crate::error::{DaemonError, DaemonResult};
use fundflow_projector::{apply_user_event, ProjectionError, UserEvent};
use fundflow_store::{ProjectionOutcome, UserProjection};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Attempts per event when the store reports a transient failure
const MAX_ATTEMPTS: u32 = 3;

/// Projection worker.
pub struct ProjectionWorker {
    projection: Arc<dyn UserProjection>,
    events: mpsc::Receiver<UserEvent>,
}

impl ProjectionWorker {
    /// Create a new projection worker.
    pub fn new(projection: Arc<dyn UserProjection>, events: mpsc::Receiver<UserEvent>) -> Self {
        Self { projection, events }
    }

    /// Run the projection worker loop.
    ///
    /// Returns when shutdown is signaled or every sender is gone.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Projection worker started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Projection worker shutdown requested");
                    break;
                }
                event = self.events.recv() => match event {
                    Some(event) => self.handle(&event).await,
                    None => break,
                }
            }
        }

        self.events.close();
        let mut drained = 0usize;
        while let Ok(event) = self.events.try_recv() {
            self.handle(&event).await;
            drained += 1;
        }

        info!(drained, "Projection worker stopped");
    }

    async fn handle(&self, event: &UserEvent) {
        if let Err(e) = self.apply(event).await {
            error!(
                error = %e,
                user_uuid = %event.user_uuid(),
                event_type = event.event_type(),
                "Failed to apply user event"
            );
        }
    }

    /// Apply one event, retrying transient store failures.
    pub async fn apply(&self, event: &UserEvent) -> DaemonResult<ProjectionOutcome> {
        let mut attempt = 1;
        loop {
            match apply_user_event(self.projection.as_ref(), event).await {
                Ok(outcome) => return Ok(outcome),
                Err(ProjectionError::Store(e)) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    warn!(error = %e, attempt, "User projection write failed (will retry)");
                    sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                    attempt += 1;
                },
                Err(e) => return Err(DaemonError::from(e)),
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
