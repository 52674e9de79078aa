//! Transfer error taxonomy.

use fundflow_domain::{AccountId, Amount, Currency};
use fundflow_store::StoreError;
use thiserror::Error;

/// Closed set of reasons a transfer can fail.
///
/// Every variant maps to a stable [`TransferError::code`]. Only
/// [`TransferError::Busy`] is worth retrying as-is.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Malformed request (self-transfer, bad amount, bad currency)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Initiator is unknown or inactive
    #[error("Initiator is not an active user")]
    UnauthorizedInitiator,

    /// Initiator does not own the source account
    #[error("Initiator does not own account {account_id}")]
    Forbidden {
        /// Source account
        account_id: AccountId,
    },

    /// Source or destination account does not exist
    #[error("Account not found: {account_id}")]
    AccountNotFound {
        /// Missing account
        account_id: AccountId,
    },

    /// Account currency differs from the request currency
    #[error("Currency mismatch on account {account_id}: account is {account}, request is {requested}")]
    CurrencyMismatch {
        /// Offending account
        account_id: AccountId,
        /// Currency held by the account
        account: Currency,
        /// Currency named by the request
        requested: Currency,
    },

    /// Source balance is below the transfer amount
    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        /// Source balance under the lock
        available: Amount,
        /// Requested amount
        requested: Amount,
    },

    /// Idempotency key is pending or already completed
    #[error("Duplicate request for idempotency key")]
    DuplicateRequest,

    /// Account lock could not be obtained in time
    #[error("Accounts are busy, retry later")]
    Busy,

    /// Persistence failed; details are logged, not surfaced
    #[error("Storage failure: {0}")]
    StorageFailure(String),
}

impl TransferError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::InvalidRequest(_) => "invalid_request",
            TransferError::UnauthorizedInitiator => "unauthorized_initiator",
            TransferError::Forbidden { .. } => "forbidden",
            TransferError::AccountNotFound { .. } => "account_not_found",
            TransferError::CurrencyMismatch { .. } => "currency_mismatch",
            TransferError::InsufficientBalance { .. } => "insufficient_balance",
            TransferError::DuplicateRequest => "duplicate_request",
            TransferError::Busy => "busy",
            TransferError::StorageFailure(_) => "storage_failure",
        }
    }

    /// Whether the same request may succeed if retried later
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::Busy)
    }

    /// Message safe to return to a client.
    ///
    /// Storage failures are opaque; everything else is the display text.
    pub fn public_message(&self) -> String {
        match self {
            TransferError::StorageFailure(_) => "Internal storage failure".to_string(),
            other => other.to_string(),
        }
    }

    /// Map a store error raised while the unit of work is open
    pub(crate) fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { id, .. } => match id.parse() {
                Ok(account_id) => TransferError::AccountNotFound { account_id },
                Err(_) => TransferError::StorageFailure(format!("not found: {}", id)),
            },
            StoreError::LockTimeout(_) | StoreError::ConcurrencyConflict { .. } => {
                TransferError::Busy
            },
            other => TransferError::StorageFailure(other.to_string()),
        }
    }
}

/// Result type for transfer operations.
pub type TransferResult<T> = Result<T, TransferError>;
