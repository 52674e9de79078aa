//! Fundflow Storage Layer
//!
//! Provides persistence for accounts, the transfer ledger, the user
//! projection and idempotency markers.
//!
//! # Architecture
//!
//! - **Repository traits**: Define the storage interface (ports)
//! - **Unit of work**: Row-locked, all-or-nothing mutation of accounts plus
//!   the ledger append
//! - **In-memory store**: Fast implementation for testing and development
//! - **PostgreSQL store**: Production implementation (feature `postgres`)
//!
//! # Usage
//!
//! ```rust
//! use fundflow_domain::{Account, Amount, Currency};
//! use fundflow_store::{AccountStore, MemoryStore, UnitOfWork};
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryStore::new();
//!     let account = Account::open(
//!         Uuid::new_v4(),
//!         Currency::new("INR").unwrap(),
//!         Amount::parse("1000.00").unwrap(),
//!     );
//!     store.create_account(&account).await.unwrap();
//!
//!     let mut uow = store.begin().await.unwrap();
//!     let locked = uow.lock_for_update(account.id).await.unwrap();
//!     assert_eq!(locked.balance.to_string(), "1000.00");
//!     uow.rollback().await.unwrap();
//! }
//! ```

#![warn(clippy::all)]

// Modules
mod error;
mod idempotency;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod repository;

// Re-exports
pub use error::StoreError;
pub use idempotency::{scoped_key, MemoryIdempotencyGuard};
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::{PgIdempotencyGuard, PgStore};
pub use repository::{
    AccountStore, IdempotencyGuard, IdempotencyStatus, LedgerReader, ProjectionOutcome,
    TransferLedger, UnitOfWork, UserDirectory, UserProjection,
};
