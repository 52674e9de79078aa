//! Seeding helpers over the in-memory store.

use fundflow_domain::{Account, AccountId, Amount, Currency, User};
use fundflow_store::{AccountStore, MemoryStore};
use uuid::Uuid;

use crate::Result;

/// Indian Rupee, the default currency in fixtures
pub fn inr() -> Currency {
    Currency::inr()
}

/// Insert an active user with `email` and return it.
pub fn seed_user(store: &MemoryStore, email: &str) -> User {
    let user = User::new(Uuid::new_v4(), email, vec!["ROLE_USER".to_string()]);
    store.insert_user(user.clone());
    user
}

/// Open an account for `owner` with an opening `balance` in `currency`.
pub async fn seed_account(
    store: &MemoryStore,
    owner: &User,
    balance: &str,
    currency: &str,
) -> Result<Account> {
    let account = Account::open(owner.id, Currency::new(currency)?, Amount::parse(balance)?);
    store.create_account(&account).await?;
    Ok(account)
}

/// Assert the sum of all balances in `currency` equals `expected`.
///
/// # Panics
/// Panics with both totals if they differ.
pub fn assert_total_balance(store: &MemoryStore, currency: &Currency, expected: &str) {
    let total = store.total_balance(currency);
    assert_eq!(
        total.to_string(),
        expected,
        "conservation violated: total {} balance is {}, expected {}",
        currency,
        total,
        expected
    );
}

/// A memory store pre-seeded with users and accounts, addressed by label.
///
/// ```
/// use fundflow_testkit::Ledger;
///
/// #[tokio::main]
/// async fn main() {
///     let ledger = Ledger::new()
///         .with_user("alice", "alice@example.com")
///         .with_account("a1", "alice", "1000.00", "INR")
///         .await
///         .unwrap();
///     assert_eq!(ledger.balance("a1").await.unwrap(), "1000.00");
/// }
/// ```
pub struct Ledger {
    /// Underlying store
    pub store: MemoryStore,
    users: Vec<(String, User)>,
    accounts: Vec<(String, AccountId)>,
}

impl Ledger {
    /// Empty ledger with default lock timeout
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    /// Empty ledger over an existing store
    pub fn with_store(store: MemoryStore) -> Self {
        Self {
            store,
            users: Vec::new(),
            accounts: Vec::new(),
        }
    }

    /// Seed a user under `label`
    pub fn with_user(mut self, label: &str, email: &str) -> Self {
        let user = seed_user(&self.store, email);
        self.users.push((label.to_string(), user));
        self
    }

    /// Seed an account under `label`, owned by the user labelled `owner`
    pub async fn with_account(
        mut self,
        label: &str,
        owner: &str,
        balance: &str,
        currency: &str,
    ) -> Result<Self> {
        let owner = self.user(owner).clone();
        let account = seed_account(&self.store, &owner, balance, currency).await?;
        self.accounts.push((label.to_string(), account.id));
        Ok(self)
    }

    /// User seeded under `label`
    ///
    /// # Panics
    /// Panics if no user has that label.
    pub fn user(&self, label: &str) -> &User {
        self.users
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, u)| u)
            .unwrap_or_else(|| panic!("no user labelled {}", label))
    }

    /// Account id seeded under `label`
    ///
    /// # Panics
    /// Panics if no account has that label.
    pub fn account(&self, label: &str) -> AccountId {
        self.accounts
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, id)| *id)
            .unwrap_or_else(|| panic!("no account labelled {}", label))
    }

    /// Committed balance of the account labelled `label`
    pub async fn balance(&self, label: &str) -> Result<String> {
        let id = self.account(label);
        let account = self
            .store
            .find_account(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("account {} vanished", id))?;
        Ok(account.balance.to_string())
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}
