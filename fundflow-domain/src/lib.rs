//! Fundflow Domain Layer
//!
//! Pure domain logic with zero I/O dependencies.
//! Contains the money value objects, the ledger entities and the rules
//! that keep balances consistent.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod entities;
pub mod value_objects;

// Re-export commonly used types
pub use entities::{
    validate_email, Account, AccountId, Transfer, TransferId, TransferStatus, User, UserId,
};
pub use value_objects::{Amount, Currency, DomainError, Money};
