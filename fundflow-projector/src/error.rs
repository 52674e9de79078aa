//! Projection errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Invalid payload for event {event_type}: {reason}")]
    InvalidPayload { event_type: String, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] fundflow_store::StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProjectionError {
    pub(crate) fn invalid(event_type: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            event_type: event_type.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProjectionError>;
