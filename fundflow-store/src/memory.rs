//! In-memory store implementation
//!
//! Used for testing and development without a database.
//! Committed state sits behind std `RwLock`s; per-account row locks are
//! tokio mutexes so a unit of work can hold them across awaits.

use crate::error::StoreError;
use crate::repository::{
    AccountStore, LedgerReader, ProjectionOutcome, TransferLedger, UnitOfWork, UserDirectory,
    UserProjection,
};
use async_trait::async_trait;
use fundflow_domain::{Account, AccountId, Amount, Currency, Transfer, TransferId, User, UserId};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::{Mutex as RowMutex, OwnedMutexGuard};

/// Default bounded wait for a row lock
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Committed accounts and ledger entries
#[derive(Default)]
struct LedgerState {
    accounts: HashMap<AccountId, Account>,
    transfers: Vec<Transfer>,
}

struct MemoryInner {
    ledger: RwLock<LedgerState>,
    row_locks: Mutex<HashMap<AccountId, Arc<RowMutex<()>>>>,
    users: RwLock<HashMap<UserId, User>>,
    lock_timeout: Duration,
    fail_next_commit: AtomicBool,
}

impl MemoryInner {
    fn read_ledger(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.ledger.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_ledger(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.ledger.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_users(&self) -> RwLockReadGuard<'_, HashMap<UserId, User>> {
        self.users.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_users(&self) -> RwLockWriteGuard<'_, HashMap<UserId, User>> {
        self.users.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn committed_account(&self, id: AccountId) -> Option<Account> {
        self.read_ledger().accounts.get(&id).cloned()
    }

    fn row_mutex(&self, id: AccountId) -> Arc<RowMutex<()>> {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(id).or_default().clone()
    }
}

/// In-memory store for testing.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Create a store whose row locks wait at most `lock_timeout`
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                ledger: RwLock::new(LedgerState::default()),
                row_locks: Mutex::new(HashMap::new()),
                users: RwLock::new(HashMap::new()),
                lock_timeout,
                fail_next_commit: AtomicBool::new(false),
            }),
        }
    }

    /// Insert or replace a user projection directly (test setup)
    pub fn insert_user(&self, user: User) {
        self.inner.write_users().insert(user.id, user);
    }

    /// Get the number of accounts
    pub fn account_count(&self) -> usize {
        self.inner.read_ledger().accounts.len()
    }

    /// Get the number of recorded transfers
    pub fn transfer_count(&self) -> usize {
        self.inner.read_ledger().transfers.len()
    }

    /// Sum of all committed balances in `currency`
    pub fn total_balance(&self, currency: &Currency) -> Amount {
        let minor: i64 = self
            .inner
            .read_ledger()
            .accounts
            .values()
            .filter(|a| &a.currency == currency)
            .map(|a| a.balance.minor_units())
            .sum();
        Amount::from_minor(minor).unwrap_or(Amount::ZERO)
    }

    /// Make the next commit fail with a database error after all staging
    /// succeeded (atomicity tests)
    pub fn set_fail_next_commit(&self, fail: bool) {
        self.inner.fail_next_commit.store(fail, Ordering::SeqCst);
    }

    /// Clear all data (useful for test setup)
    pub fn clear(&self) {
        let mut ledger = self.inner.write_ledger();
        ledger.accounts.clear();
        ledger.transfers.clear();
        drop(ledger);
        self.inner.write_users().clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Unit of work
// =============================================================================

/// Row lock held by a unit of work, with the version read under the lock
struct LockedRow {
    _guard: OwnedMutexGuard<()>,
    version: i64,
}

/// Staged changes plus the row locks protecting them.
///
/// Nothing touches committed state until `commit`; dropping releases locks.
struct MemoryUnitOfWork {
    inner: Arc<MemoryInner>,
    locks: BTreeMap<AccountId, LockedRow>,
    staged: BTreeMap<AccountId, Account>,
    pending_transfers: Vec<Transfer>,
}

impl MemoryUnitOfWork {
    fn new(inner: Arc<MemoryInner>) -> Self {
        Self {
            inner,
            locks: BTreeMap::new(),
            staged: BTreeMap::new(),
            pending_transfers: Vec::new(),
        }
    }

    fn apply(self) -> Result<(), StoreError> {
        let mut ledger = self.inner.write_ledger();

        for (id, account) in &self.staged {
            match ledger.accounts.get(id) {
                Some(current) if current.version == account.version => {},
                _ => return Err(StoreError::conflict("Account", id.to_string())),
            }
        }

        for (id, mut account) in self.staged {
            account.version += 1;
            ledger.accounts.insert(id, account);
        }
        ledger.transfers.extend(self.pending_transfers);

        // Row guards in `self.locks` are released when this frame returns
        Ok(())
    }
}

#[async_trait]
impl TransferLedger for MemoryUnitOfWork {
    async fn append(&mut self, transfer: &Transfer) -> Result<(), StoreError> {
        let duplicate = self.pending_transfers.iter().any(|t| t.id == transfer.id)
            || self.inner.read_ledger().transfers.iter().any(|t| t.id == transfer.id);
        if duplicate {
            return Err(StoreError::duplicate("Transfer", transfer.id.to_string()));
        }
        self.pending_transfers.push(transfer.clone());
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn lock_for_update(&mut self, id: AccountId) -> Result<Account, StoreError> {
        if self.locks.contains_key(&id) {
            if let Some(staged) = self.staged.get(&id) {
                return Ok(staged.clone());
            }
            return self
                .inner
                .committed_account(id)
                .ok_or_else(|| StoreError::not_found("Account", id.to_string()));
        }

        if self.inner.committed_account(id).is_none() {
            return Err(StoreError::not_found("Account", id.to_string()));
        }

        let row = self.inner.row_mutex(id);
        let timeout = self.inner.lock_timeout;
        let guard = tokio::time::timeout(timeout, row.lock_owned()).await.map_err(|_| {
            tracing::warn!(
                account_id = %id,
                timeout_ms = timeout.as_millis() as u64,
                "Account lock timed out"
            );
            StoreError::LockTimeout(format!("account {}", id))
        })?;

        // Re-read under the lock: the holder we waited on may have committed
        let account = self
            .inner
            .committed_account(id)
            .ok_or_else(|| StoreError::not_found("Account", id.to_string()))?;

        self.locks.insert(
            id,
            LockedRow {
                _guard: guard,
                version: account.version,
            },
        );
        Ok(account)
    }

    async fn save(&mut self, account: &Account) -> Result<(), StoreError> {
        match self.locks.get(&account.id) {
            Some(row) if row.version == account.version => {
                self.staged.insert(account.id, account.clone());
                Ok(())
            },
            _ => Err(StoreError::conflict("Account", account.id.to_string())),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if self.inner.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database("injected commit failure".to_string()));
        }
        (*self).apply()
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

// =============================================================================
// AccountStore / LedgerReader
// =============================================================================

#[async_trait]
impl AccountStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        Ok(Box::new(MemoryUnitOfWork::new(self.inner.clone())))
    }

    async fn create_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut ledger = self.inner.write_ledger();
        if ledger.accounts.contains_key(&account.id) {
            return Err(StoreError::duplicate("Account", account.id.to_string()));
        }
        ledger.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.inner.committed_account(id))
    }

    async fn find_accounts_by_owner(&self, owner_id: UserId) -> Result<Vec<Account>, StoreError> {
        let mut accounts: Vec<Account> = self
            .inner
            .read_ledger()
            .accounts
            .values()
            .filter(|a| a.is_owned_by(owner_id))
            .cloned()
            .collect();
        accounts.sort_by_key(|a| (a.created_at, a.id));
        Ok(accounts)
    }
}

#[async_trait]
impl LedgerReader for MemoryStore {
    async fn find_transfer(&self, id: TransferId) -> Result<Option<Transfer>, StoreError> {
        Ok(self.inner.read_ledger().transfers.iter().find(|t| t.id == id).cloned())
    }

    async fn find_transfers_by_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Transfer>, StoreError> {
        Ok(self
            .inner
            .read_ledger()
            .transfers
            .iter()
            .rev()
            .filter(|t| t.involves(account_id))
            .cloned()
            .collect())
    }
}

// =============================================================================
// Users
// =============================================================================

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_active_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .inner
            .read_users()
            .values()
            .find(|u| u.active && u.email == email)
            .cloned())
    }

    async fn find_user_by_uuid(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read_users().get(&id).cloned())
    }
}

#[async_trait]
impl UserProjection for MemoryStore {
    async fn upsert_user(
        &self,
        id: UserId,
        email: &str,
        roles: &[String],
        version: Option<i64>,
    ) -> Result<ProjectionOutcome, StoreError> {
        let mut users = self.inner.write_users();

        if users.values().any(|u| u.id != id && u.email == email) {
            return Err(StoreError::duplicate("User email", email));
        }

        match users.get_mut(&id) {
            Some(user) if !user.accepts_version(version) => Ok(ProjectionOutcome::Stale),
            Some(user) => {
                user.email = email.to_string();
                user.roles = roles.to_vec();
                user.active = true;
                if let Some(v) = version {
                    user.version = v;
                }
                Ok(ProjectionOutcome::Applied)
            },
            None => {
                let mut user = User::new(id, email, roles.to_vec());
                user.version = version.unwrap_or(0);
                users.insert(id, user);
                Ok(ProjectionOutcome::Applied)
            },
        }
    }

    async fn deactivate_user(
        &self,
        id: UserId,
        version: Option<i64>,
    ) -> Result<ProjectionOutcome, StoreError> {
        let mut users = self.inner.write_users();

        match users.get_mut(&id) {
            None => Ok(ProjectionOutcome::Missing),
            Some(user) if !user.accepts_version(version) => Ok(ProjectionOutcome::Stale),
            Some(user) => {
                user.active = false;
                if let Some(v) = version {
                    user.version = v;
                }
                Ok(ProjectionOutcome::Applied)
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use fundflow_domain::Money;
    use uuid::Uuid;

    fn inr() -> Currency {
        Currency::new("INR").unwrap()
    }

    async fn open(store: &MemoryStore, balance: &str) -> Account {
        let account = Account::open(Uuid::new_v4(), inr(), Amount::parse(balance).unwrap());
        store.create_account(&account).await.unwrap();
        account
    }

    #[tokio::test]
    async fn test_create_and_find_account() {
        let store = MemoryStore::new();
        let account = open(&store, "100.00").await;

        let found = store.find_account(account.id).await.unwrap().unwrap();
        assert_eq!(found, account);
        assert_eq!(store.account_count(), 1);

        let owned = store.find_accounts_by_owner(account.owner_id).await.unwrap();
        assert_eq!(owned.len(), 1);

        let err = store.create_account(&account).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_commit_applies_changes_and_bumps_version() {
        let store = MemoryStore::new();
        let account = open(&store, "100.00").await;

        let mut uow = store.begin().await.unwrap();
        let mut locked = uow.lock_for_update(account.id).await.unwrap();
        locked.debit(&Money::parse("40.00", "INR").unwrap()).unwrap();
        uow.save(&locked).await.unwrap();
        uow.commit().await.unwrap();

        let found = store.find_account(account.id).await.unwrap().unwrap();
        assert_eq!(found.balance.to_string(), "60.00");
        assert_eq!(found.version, 1);
    }

    #[tokio::test]
    async fn test_rollback_and_drop_discard_changes() {
        let store = MemoryStore::new();
        let account = open(&store, "100.00").await;

        let mut uow = store.begin().await.unwrap();
        let mut locked = uow.lock_for_update(account.id).await.unwrap();
        locked.debit(&Money::parse("40.00", "INR").unwrap()).unwrap();
        uow.save(&locked).await.unwrap();
        uow.rollback().await.unwrap();

        {
            let mut uow = store.begin().await.unwrap();
            let mut locked = uow.lock_for_update(account.id).await.unwrap();
            locked.debit(&Money::parse("10.00", "INR").unwrap()).unwrap();
            uow.save(&locked).await.unwrap();
        }

        let found = store.find_account(account.id).await.unwrap().unwrap();
        assert_eq!(found.balance.to_string(), "100.00");
        assert_eq!(found.version, 0);
    }

    #[tokio::test]
    async fn test_lock_missing_account() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();

        let err = uow.lock_for_update(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_relock_same_account_is_reentrant() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(50));
        let account = open(&store, "100.00").await;

        let mut uow = store.begin().await.unwrap();
        uow.lock_for_update(account.id).await.unwrap();
        let again = uow.lock_for_update(account.id).await.unwrap();
        assert_eq!(again.id, account.id);
    }

    #[tokio::test]
    async fn test_lock_timeout_when_held() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(50));
        let account = open(&store, "100.00").await;

        let mut holder = store.begin().await.unwrap();
        holder.lock_for_update(account.id).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let err = waiter.lock_for_update(account.id).await.unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));
        assert!(err.is_retryable());

        drop(holder);
        waiter.lock_for_update(account.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_waiter_sees_committed_state() {
        let store = MemoryStore::new();
        let account = open(&store, "100.00").await;

        let mut first = store.begin().await.unwrap();
        let mut locked = first.lock_for_update(account.id).await.unwrap();

        let store2 = store.clone();
        let id = account.id;
        let waiter = tokio::spawn(async move {
            let mut uow = store2.begin().await.unwrap();
            let seen = uow.lock_for_update(id).await.unwrap();
            uow.rollback().await.unwrap();
            seen
        });

        tokio::task::yield_now().await;
        locked.credit(&Money::parse("5.00", "INR").unwrap()).unwrap();
        first.save(&locked).await.unwrap();
        first.commit().await.unwrap();

        let seen = waiter.await.unwrap();
        assert_eq!(seen.balance.to_string(), "105.00");
        assert_eq!(seen.version, 1);
    }

    #[tokio::test]
    async fn test_save_requires_lock_and_matching_version() {
        let store = MemoryStore::new();
        let account = open(&store, "100.00").await;

        let mut uow = store.begin().await.unwrap();
        let err = uow.save(&account).await.unwrap_err();
        assert!(matches!(err, StoreError::ConcurrencyConflict { .. }));

        let mut locked = uow.lock_for_update(account.id).await.unwrap();
        locked.version += 7;
        let err = uow.save(&locked).await.unwrap_err();
        assert!(matches!(err, StoreError::ConcurrencyConflict { .. }));
    }

    #[tokio::test]
    async fn test_injected_commit_failure_leaves_state_unchanged() {
        let store = MemoryStore::new();
        let from = open(&store, "100.00").await;
        let to = open(&store, "0.00").await;
        let money = Money::parse("30.00", "INR").unwrap();

        store.set_fail_next_commit(true);

        let mut uow = store.begin().await.unwrap();
        let mut a = uow.lock_for_update(from.id).await.unwrap();
        let mut b = uow.lock_for_update(to.id).await.unwrap();
        a.debit(&money).unwrap();
        b.credit(&money).unwrap();
        uow.save(&a).await.unwrap();
        uow.save(&b).await.unwrap();
        uow.append(&Transfer::new(from.id, to.id, money, from.owner_id)).await.unwrap();

        let err = uow.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));

        assert_eq!(store.transfer_count(), 0);
        assert_eq!(store.total_balance(&inr()).to_string(), "100.00");
        assert_eq!(store.find_account(from.id).await.unwrap().unwrap().version, 0);

        // Locks were released with the failed unit of work
        let mut uow = store.begin().await.unwrap();
        uow.lock_for_update(from.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_ledger_append_visible_after_commit() {
        let store = MemoryStore::new();
        let from = open(&store, "100.00").await;
        let to = open(&store, "0.00").await;
        let transfer = Transfer::new(from.id, to.id, Money::parse("1.00", "INR").unwrap(), from.owner_id);

        let mut uow = store.begin().await.unwrap();
        uow.append(&transfer).await.unwrap();
        assert!(store.find_transfer(transfer.id).await.unwrap().is_none());
        uow.commit().await.unwrap();

        assert_eq!(store.find_transfer(transfer.id).await.unwrap(), Some(transfer.clone()));
        assert_eq!(store.find_transfers_by_account(to.id).await.unwrap().len(), 1);

        let mut uow = store.begin().await.unwrap();
        let err = uow.append(&transfer).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_user_projection_versioning() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let roles = vec!["ROLE_USER".to_string()];

        let outcome = store.upsert_user(id, "a@example.com", &roles, Some(3)).await.unwrap();
        assert_eq!(outcome, ProjectionOutcome::Applied);

        let outcome = store.upsert_user(id, "old@example.com", &roles, Some(2)).await.unwrap();
        assert_eq!(outcome, ProjectionOutcome::Stale);

        let user = store.find_active_user_by_email("a@example.com").await.unwrap().unwrap();
        assert_eq!(user.version, 3);

        assert_eq!(store.deactivate_user(id, Some(1)).await.unwrap(), ProjectionOutcome::Stale);
        assert_eq!(store.deactivate_user(id, None).await.unwrap(), ProjectionOutcome::Applied);
        assert!(store.find_active_user_by_email("a@example.com").await.unwrap().is_none());

        let inactive = store.find_user_by_uuid(id).await.unwrap().unwrap();
        assert!(!inactive.active);

        assert_eq!(
            store.deactivate_user(Uuid::new_v4(), None).await.unwrap(),
            ProjectionOutcome::Missing
        );
    }

    #[tokio::test]
    async fn test_user_projection_reactivates_and_rejects_email_clash() {
        let store = MemoryStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        store.upsert_user(alice, "alice@example.com", &[], None).await.unwrap();
        store.deactivate_user(alice, None).await.unwrap();
        store.upsert_user(alice, "alice@example.com", &[], None).await.unwrap();
        assert!(store.find_active_user_by_email("alice@example.com").await.unwrap().is_some());

        let err = store.upsert_user(bob, "alice@example.com", &[], None).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
    }
}
