//! Domain Entities for Fundflow
//!
//! Accounts hold balances, transfers are the append-only audit trail of
//! value movement, and users are a read-mostly projection owned by an
//! external identity service.

use crate::value_objects::{Amount, Currency, DomainError, Money};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Identifiers
// =============================================================================

/// Unique identifier for an Account
pub type AccountId = Uuid;

/// Unique identifier for a Transfer
pub type TransferId = Uuid;

/// Unique identifier for a User (assigned by the identity service)
pub type UserId = Uuid;

// =============================================================================
// Account
// =============================================================================

/// Account holding a single-currency balance owned by exactly one user.
///
/// `version` is bumped by the store on every save and is used to detect
/// writes that bypassed the row lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub owner_id: UserId,
    pub balance: Amount,
    pub currency: Currency,
    pub version: i64,

    // Audit
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Open a new account for `owner_id` with an opening balance
    pub fn open(owner_id: UserId, currency: Currency, opening_balance: Amount) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            balance: opening_balance,
            currency,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Current balance as money
    pub fn balance_money(&self) -> Money {
        Money::new(self.balance, self.currency.clone())
    }

    /// Check ownership
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.owner_id == user_id
    }

    /// Remove `money` from the balance.
    ///
    /// # Errors
    /// - `CurrencyMismatch` if `money` is in another currency
    /// - `InsufficientBalance` if the balance would go negative
    pub fn debit(&mut self, money: &Money) -> Result<(), DomainError> {
        self.ensure_currency(money)?;
        self.balance = self.balance.checked_sub(money.amount).ok_or(
            DomainError::InsufficientBalance {
                available: self.balance,
                requested: money.amount,
            },
        )?;
        Ok(())
    }

    /// Add `money` to the balance.
    ///
    /// # Errors
    /// - `CurrencyMismatch` if `money` is in another currency
    /// - `AmountOverflow` if the balance leaves the representable range
    pub fn credit(&mut self, money: &Money) -> Result<(), DomainError> {
        self.ensure_currency(money)?;
        self.balance = self.balance.checked_add(money.amount)?;
        Ok(())
    }

    /// Stamp the last-modified time
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn ensure_currency(&self, money: &Money) -> Result<(), DomainError> {
        if !money.same_currency(&self.currency) {
            return Err(DomainError::CurrencyMismatch {
                expected: self.currency.clone(),
                found: money.currency.clone(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Transfer
// =============================================================================

/// Status exposed for a transfer.
///
/// Only completed transfers are ever recorded, failures leave no row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Balances moved and ledger entry committed
    Completed,
}

impl TransferStatus {
    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Completed => "completed",
        }
    }
}

/// Immutable record of one completed movement of value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Amount,
    pub currency: Currency,
    pub initiator_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl Transfer {
    /// Create a transfer record with a fresh identifier
    pub fn new(
        from_account_id: AccountId,
        to_account_id: AccountId,
        money: Money,
        initiator_id: UserId,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_account_id,
            to_account_id,
            amount: money.amount,
            currency: money.currency,
            initiator_id,
            created_at: Utc::now(),
        }
    }

    /// Amount and currency moved
    pub fn money(&self) -> Money {
        Money::new(self.amount, self.currency.clone())
    }

    /// Check if the transfer touched `account_id` on either side
    pub fn involves(&self, account_id: AccountId) -> bool {
        self.from_account_id == account_id || self.to_account_id == account_id
    }

    /// Recorded transfers are always completed
    pub fn status(&self) -> TransferStatus {
        TransferStatus::Completed
    }
}

// =============================================================================
// User (projection)
// =============================================================================

/// Local projection of a user owned by the identity service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub roles: Vec<String>,
    pub active: bool,
    /// Version of the last applied identity event (0 if never versioned)
    pub version: i64,
}

impl User {
    /// Create an active user projection
    pub fn new(id: UserId, email: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            id,
            email: email.into(),
            roles,
            active: true,
            version: 0,
        }
    }

    /// Check if the user may initiate transfers
    pub fn can_initiate(&self) -> bool {
        self.active
    }

    /// Check if the user carries `role`
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Check if an identity event carrying `incoming` should be applied.
    ///
    /// Unversioned events always apply (last writer wins). Versioned events
    /// apply unless older than what was already projected; replaying the
    /// same version is harmless.
    pub fn accepts_version(&self, incoming: Option<i64>) -> bool {
        incoming.map_or(true, |v| v >= self.version)
    }
}

/// Basic structural email check used by the projection
pub fn validate_email(email: &str) -> Result<(), DomainError> {
    let trimmed = email.trim();
    match trimmed.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(DomainError::InvalidEmail(email.to_string())),
    }
}

// =============================================================================
// Tests
// =============================================================================
