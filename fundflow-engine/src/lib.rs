//! Fundflow Transfer Engine
//!
//! Moves money between two accounts exactly once under concurrent requests.
//!
//! # Architecture
//!
//! ```text
//! TransferRequest → TransferEngine → IdempotencyGuard → UnitOfWork → Transfer
//! ```
//!
//! # Components
//!
//! - **Request**: Raw transfer input and how the initiator was identified
//! - **Engine**: Validation, canonical-order locking, mutation and ledger
//!   append inside one unit of work
//! - **Error**: Closed error taxonomy with stable codes
//!
//! # Example
//!
//! ```rust,ignore
//! use fundflow_engine::{Initiator, TransferEngine, TransferRequest};
//! use fundflow_store::{MemoryIdempotencyGuard, MemoryStore};
//! use std::sync::Arc;
//!
//! let store = MemoryStore::new();
//! let guard = Arc::new(MemoryIdempotencyGuard::default());
//! let engine = TransferEngine::new(Arc::new(store.clone()), Arc::new(store), guard);
//!
//! let request = TransferRequest::new(from, to, "250.00", "INR", Initiator::Email(email))
//!     .with_idempotency_key("client-retry-token");
//! let transfer = engine.execute(request).await?;
//! ```

#![warn(clippy::all)]

pub mod engine;
pub mod error;
pub mod request;

// Re-exports for convenience
pub use engine::TransferEngine;
pub use error::{TransferError, TransferResult};
pub use request::{Initiator, TransferRequest};
