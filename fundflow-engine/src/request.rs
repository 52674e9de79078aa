//! Transfer request types.

use fundflow_domain::{AccountId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the caller identified the initiating user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initiator {
    /// Authenticated email (HTTP surface)
    Email(String),
    /// Identity-service UUID
    UserId(UserId),
}

impl Initiator {
    /// Stable string used to scope idempotency keys when the initiator
    /// does not resolve to a known user
    pub fn scope(&self) -> String {
        match self {
            Initiator::Email(email) => format!("email:{}", email),
            Initiator::UserId(id) => format!("user:{}", id),
        }
    }
}

impl fmt::Display for Initiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Initiator::Email(email) => f.write_str(email),
            Initiator::UserId(id) => write!(f, "{}", id),
        }
    }
}

/// Request to move `amount` of `currency` between two accounts.
///
/// Amount and currency stay raw strings here; they are validated inside
/// the engine in a fixed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: String,
    pub currency: String,
    pub initiator: Initiator,
    pub idempotency_key: Option<String>,
}

impl TransferRequest {
    /// Create a request without an idempotency key
    pub fn new(
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: impl Into<String>,
        currency: impl Into<String>,
        initiator: Initiator,
    ) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount: amount.into(),
            currency: currency.into(),
            initiator,
            idempotency_key: None,
        }
    }

    /// Attach a client-supplied idempotency key
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}
