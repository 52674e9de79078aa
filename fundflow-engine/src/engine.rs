//! Transfer engine: moves money between two accounts exactly once.
//!
//! # Flow
//!
//! ```text
//! request → look up initiator → idempotency guard → authorize initiator
//!         → validate shape → accounts exist → begin
//!         → lock both accounts (ascending UUID) → validate rules
//!         → debit/credit → save both → append transfer → commit
//!         → mark key completed (or clear it on failure)
//! ```

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use fundflow_domain::{Account, Amount, Currency, DomainError, Money, Transfer, User};
use fundflow_store::{
    scoped_key, AccountStore, IdempotencyGuard, IdempotencyStatus, UnitOfWork, UserDirectory,
};

use crate::error::{TransferError, TransferResult};
use crate::request::{Initiator, TransferRequest};

// =============================================================================
// TransferEngine
// =============================================================================

/// Executes transfers atomically.
///
/// Holds no mutable state of its own; mutual exclusion comes from the row
/// locks taken inside each unit of work. Cheap to clone.
#[derive(Clone)]
pub struct TransferEngine {
    /// Accounts and the unit-of-work factory
    accounts: Arc<dyn AccountStore>,
    /// User projection used to authorize initiators
    users: Arc<dyn UserDirectory>,
    /// Deduplication of client retries
    guard: Arc<dyn IdempotencyGuard>,
}

impl TransferEngine {
    /// Create a new engine.
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        users: Arc<dyn UserDirectory>,
        guard: Arc<dyn IdempotencyGuard>,
    ) -> Self {
        Self { accounts, users, guard }
    }

    /// Execute a transfer.
    ///
    /// The work runs on its own task, so dropping the returned future does
    /// not abandon a unit of work halfway: it still commits or rolls back.
    /// Callers that lose the outcome should retry with the same
    /// idempotency key.
    pub async fn execute(&self, request: TransferRequest) -> TransferResult<Transfer> {
        let engine = self.clone();
        tokio::spawn(async move { engine.run(request).await }).await.map_err(|e| {
            error!(error = %e, "Transfer task aborted");
            TransferError::StorageFailure(format!("transfer task aborted: {}", e))
        })?
    }

    async fn run(&self, request: TransferRequest) -> TransferResult<Transfer> {
        // Looked up before the guard so keys are scoped by user id however
        // the caller identified the initiator. The verdict waits for step 2.
        let user = match self.lookup_initiator(&request.initiator).await {
            Ok(user) => user,
            Err(err) => {
                log_rejection(&request, &err);
                return Err(err);
            },
        };
        let scope = match &user {
            Some(user) => Initiator::UserId(user.id).scope(),
            None => request.initiator.scope(),
        };
        let key = request
            .idempotency_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| scoped_key(&scope, k));

        // 1. Idempotency
        if let Some(key) = &key {
            match self.guard.try_begin(key).await {
                Ok(IdempotencyStatus::Fresh) => {},
                Ok(IdempotencyStatus::Duplicate) => {
                    let err = TransferError::DuplicateRequest;
                    log_rejection(&request, &err);
                    return Err(err);
                },
                Err(e) => {
                    error!(
                        initiator = %request.initiator,
                        error = %e,
                        "Idempotency guard unavailable"
                    );
                    return Err(TransferError::StorageFailure(e.to_string()));
                },
            }
        }

        let result = self.transfer(&request, user).await;

        if let Some(key) = &key {
            let marked = match &result {
                Ok(_) => self.guard.complete(key).await,
                Err(_) => self.guard.abort(key).await,
            };
            if let Err(e) = marked {
                warn!(error = %e, "Failed to update idempotency marker");
            }
        }

        match &result {
            Ok(transfer) => info!(
                transfer_id = %transfer.id,
                from = %transfer.from_account_id,
                to = %transfer.to_account_id,
                amount = %transfer.amount,
                currency = %transfer.currency,
                initiator = %transfer.initiator_id,
                "Transfer completed"
            ),
            Err(err) => log_rejection(&request, err),
        }

        result
    }

    /// Steps 2-8 plus the mutation. Rolls back on any failure after begin.
    async fn transfer(
        &self,
        request: &TransferRequest,
        user: Option<User>,
    ) -> TransferResult<Transfer> {
        // 2. Initiator, failing closed
        let initiator = user.filter(User::can_initiate).ok_or(TransferError::UnauthorizedInitiator)?;

        // 3. Self-transfer
        if request.from_account_id == request.to_account_id {
            return Err(TransferError::InvalidRequest(
                "Cannot transfer to the same account".to_string(),
            ));
        }

        // 4. Amount and currency shape
        let amount = Amount::parse_positive(&request.amount)
            .map_err(|e| TransferError::InvalidRequest(e.to_string()))?;
        let currency = Currency::new(&request.currency)
            .map_err(|e| TransferError::InvalidRequest(e.to_string()))?;
        let money = Money::new(amount, currency);

        // 5. Existence, checked before locking so a missing account is not
        // reported as Busy while the other one is held
        for account_id in [request.from_account_id, request.to_account_id] {
            if self.accounts.find_account(account_id).await.map_err(storage_failure)?.is_none() {
                return Err(TransferError::AccountNotFound { account_id });
            }
        }

        let mut uow = self.accounts.begin().await.map_err(storage_failure)?;

        match self.apply(uow.as_mut(), request, &initiator, &money).await {
            Ok(transfer) => {
                uow.commit().await.map_err(TransferError::from_store)?;
                Ok(transfer)
            },
            Err(err) => {
                if let Err(e) = uow.rollback().await {
                    warn!(error = %e, "Rollback failed; transaction discarded on drop");
                }
                Err(err)
            },
        }
    }

    /// Steps 6-8 under both row locks, then the balance mutation.
    async fn apply(
        &self,
        uow: &mut dyn UnitOfWork,
        request: &TransferRequest,
        initiator: &User,
        money: &Money,
    ) -> TransferResult<Transfer> {
        let (from_id, to_id) = (request.from_account_id, request.to_account_id);

        // Lock in ascending UUID order regardless of direction
        let (first, second) = if from_id < to_id { (from_id, to_id) } else { (to_id, from_id) };
        let locked_first = uow.lock_for_update(first).await.map_err(TransferError::from_store)?;
        let locked_second = uow.lock_for_update(second).await.map_err(TransferError::from_store)?;
        debug!(%first, %second, "Accounts locked");

        let (mut source, mut destination) = if locked_first.id == from_id {
            (locked_first, locked_second)
        } else {
            (locked_second, locked_first)
        };

        // 6. Currency
        ensure_currency(&source, &money.currency)?;
        ensure_currency(&destination, &money.currency)?;

        // 7. Ownership
        if !source.is_owned_by(initiator.id) {
            return Err(TransferError::Forbidden { account_id: source.id });
        }

        // 8. Balance
        if source.balance < money.amount {
            return Err(TransferError::InsufficientBalance {
                available: source.balance,
                requested: money.amount,
            });
        }

        source.debit(money).map_err(domain_rejection)?;
        destination.credit(money).map_err(domain_rejection)?;
        source.touch();
        destination.touch();

        uow.save(&source).await.map_err(TransferError::from_store)?;
        uow.save(&destination).await.map_err(TransferError::from_store)?;

        let transfer = Transfer::new(from_id, to_id, money.clone(), initiator.id);
        uow.append(&transfer).await.map_err(TransferError::from_store)?;

        Ok(transfer)
    }

    /// Find the user behind the initiator, active or not.
    async fn lookup_initiator(&self, initiator: &Initiator) -> TransferResult<Option<User>> {
        match initiator {
            Initiator::Email(email) => self.users.find_active_user_by_email(email).await,
            Initiator::UserId(id) => self.users.find_user_by_uuid(*id).await,
        }
        .map_err(storage_failure)
    }
}

fn ensure_currency(account: &Account, requested: &Currency) -> TransferResult<()> {
    if &account.currency != requested {
        return Err(TransferError::CurrencyMismatch {
            account_id: account.id,
            account: account.currency.clone(),
            requested: requested.clone(),
        });
    }
    Ok(())
}

fn domain_rejection(err: DomainError) -> TransferError {
    match err {
        DomainError::InsufficientBalance { available, requested } => {
            TransferError::InsufficientBalance { available, requested }
        },
        other => TransferError::InvalidRequest(other.to_string()),
    }
}

fn storage_failure(err: fundflow_store::StoreError) -> TransferError {
    TransferError::StorageFailure(err.to_string())
}

fn log_rejection(request: &TransferRequest, err: &TransferError) {
    match err {
        TransferError::StorageFailure(detail) => error!(
            from = %request.from_account_id,
            to = %request.to_account_id,
            amount = %request.amount,
            currency = %request.currency,
            initiator = %request.initiator,
            detail = %detail,
            "Storage failure during transfer"
        ),
        TransferError::Busy => warn!(
            from = %request.from_account_id,
            to = %request.to_account_id,
            initiator = %request.initiator,
            code = err.code(),
            "Transfer rejected"
        ),
        _ => info!(
            from = %request.from_account_id,
            to = %request.to_account_id,
            initiator = %request.initiator,
            code = err.code(),
            reason = %err,
            "Transfer rejected"
        ),
    }
}

// =============================================================================
// Tests
// =============================================================================
