//! Repository trait definitions (Ports)
//!
//! These traits define the storage interface for the transfer engine.
//! Implementations can be PostgreSQL, in-memory, or mock for testing.

use crate::error::StoreError;
use async_trait::async_trait;
use fundflow_domain::{Account, AccountId, Transfer, TransferId, User, UserId};

// =============================================================================
// Accounts
// =============================================================================

/// Durable account storage with an explicit exclusive-locking primitive.
///
/// Balance mutation only happens through a [`UnitOfWork`] obtained from
/// [`AccountStore::begin`].
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Start an atomic unit of work (one database transaction)
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;

    /// Insert a newly opened account
    async fn create_account(&self, account: &Account) -> Result<(), StoreError>;

    /// Read the last committed state of an account, without locking
    async fn find_account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Read all accounts owned by a user
    async fn find_accounts_by_owner(&self, owner_id: UserId) -> Result<Vec<Account>, StoreError>;
}

/// Append-only writer for completed transfers.
///
/// Participates in the enclosing unit of work: an appended transfer becomes
/// visible only if the unit of work commits.
#[async_trait]
pub trait TransferLedger: Send {
    /// Append a completed transfer
    async fn append(&mut self, transfer: &Transfer) -> Result<(), StoreError>;
}

/// One atomic unit of work over accounts and the ledger.
///
/// Dropping a unit of work without calling [`UnitOfWork::commit`] discards
/// every staged change and releases its locks.
#[async_trait]
pub trait UnitOfWork: TransferLedger + Send {
    /// Lock an account for exclusive mutation and return its current state.
    ///
    /// Blocks until the lock is obtainable or the store's lock timeout
    /// elapses (`StoreError::LockTimeout`). Fails with `NotFound` if absent.
    async fn lock_for_update(&mut self, id: AccountId) -> Result<Account, StoreError>;

    /// Stage an updated account.
    ///
    /// Fails with `ConcurrencyConflict` if the account is not locked by this
    /// unit of work or its version no longer matches the locked row.
    async fn save(&mut self, account: &Account) -> Result<(), StoreError>;

    /// Make every staged change durable at once
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discard every staged change
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Read-only queries over the transfer ledger
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Find a transfer by ID
    async fn find_transfer(&self, id: TransferId) -> Result<Option<Transfer>, StoreError>;

    /// Find transfers touching an account (newest first)
    async fn find_transfers_by_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Transfer>, StoreError>;
}

// =============================================================================
// Users
// =============================================================================

/// Read side of the user projection
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Find an active user by email
    async fn find_active_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Find a user by UUID (active or not)
    async fn find_user_by_uuid(&self, id: UserId) -> Result<Option<User>, StoreError>;
}

/// Result of applying an identity event to the projection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionOutcome {
    /// The projection changed (or was re-written with identical data)
    Applied,
    /// The event was older than the stored version and was ignored
    Stale,
    /// The user does not exist locally (deactivation only)
    Missing,
}

/// Write side of the user projection, used only by the sync process
#[async_trait]
pub trait UserProjection: Send + Sync {
    /// Insert or update a user by UUID and mark it active
    async fn upsert_user(
        &self,
        id: UserId,
        email: &str,
        roles: &[String],
        version: Option<i64>,
    ) -> Result<ProjectionOutcome, StoreError>;

    /// Mark a user inactive; the row is kept
    async fn deactivate_user(
        &self,
        id: UserId,
        version: Option<i64>,
    ) -> Result<ProjectionOutcome, StoreError>;
}

// =============================================================================
// Idempotency
// =============================================================================

/// Result of [`IdempotencyGuard::try_begin`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyStatus {
    /// Key was absent (or expired) and is now marked pending for the caller
    Fresh,
    /// Key is pending or completed
    Duplicate,
}

/// Short-lived key→state cache guarding against retried client requests.
///
/// This is a deduplication layer only. Correctness of balances never depends
/// on it: a lost record can at worst let a retried request run again.
#[async_trait]
pub trait IdempotencyGuard: Send + Sync {
    /// Atomically check-and-mark `key` as pending
    async fn try_begin(&self, key: &str) -> Result<IdempotencyStatus, StoreError>;

    /// Mark `key` completed, refreshing its time-to-live
    async fn complete(&self, key: &str) -> Result<(), StoreError>;

    /// Clear a pending marker so the key can be retried
    async fn abort(&self, key: &str) -> Result<(), StoreError>;
}
