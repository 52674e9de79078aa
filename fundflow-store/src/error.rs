//! Storage layer errors

use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Debug, Error)]
pub enum StoreError {
    /// Entity not found
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound {
        /// Type of entity (account, transfer, user)
        entity_type: String,
        /// Entity ID
        id: String,
    },

    /// Duplicate entity (unique key violation)
    #[error("Duplicate entity: {entity_type} with id {id}")]
    Duplicate {
        /// Type of entity
        entity_type: String,
        /// Entity ID
        id: String,
    },

    /// Row lock could not be obtained within the configured wait
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    /// Entity changed outside the lock held by this unit of work
    #[error("Concurrency conflict: {entity_type} with id {id}")]
    ConcurrencyConflict {
        /// Type of entity
        entity_type: String,
        /// Entity ID
        id: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Deserialization error (reading stored rows)
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Domain error passthrough
    #[error("Domain error: {0}")]
    Domain(#[from] fundflow_domain::DomainError),
}

impl StoreError {
    /// Create a not found error
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Create a duplicate error
    pub fn duplicate(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Duplicate {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Create a concurrency conflict error
    pub fn conflict(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::ConcurrencyConflict {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Whether retrying the whole unit of work may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::LockTimeout(_) | StoreError::ConcurrencyConflict { .. })
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound {
                entity_type: "unknown".to_string(),
                id: "unknown".to_string(),
            },
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // unique_violation
                Some("23505") => StoreError::Duplicate {
                    entity_type: db_err.table().unwrap_or("unknown").to_string(),
                    id: db_err.constraint().unwrap_or("unknown").to_string(),
                },
                // lock_not_available, deadlock_detected
                Some("55P03") | Some("40P01") => StoreError::LockTimeout(db_err.to_string()),
                // serialization_failure
                Some("40001") => StoreError::conflict("unknown", db_err.to_string()),
                _ => StoreError::Database(db_err.to_string()),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Connection(err.to_string())
            },
            _ => StoreError::Database(err.to_string()),
        }
    }
}
