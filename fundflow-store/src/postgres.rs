//! PostgreSQL store implementation.
//!
//! Row locks are `SELECT … FOR UPDATE` inside one transaction per unit of
//! work, bounded by `SET LOCAL lock_timeout`. Saves carry the version read
//! under the lock so writes that bypassed it surface as conflicts.
//!
//! This module uses dynamic queries (sqlx::query) instead of compile-time
//! checked macros (sqlx::query!) to allow compilation without DATABASE_URL.

use crate::error::StoreError;
use crate::repository::{
    AccountStore, IdempotencyGuard, IdempotencyStatus, LedgerReader, ProjectionOutcome,
    TransferLedger, UnitOfWork, UserDirectory, UserProjection,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fundflow_domain::{Account, AccountId, Amount, Currency, Transfer, TransferId, User, UserId};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashMap;
use std::time::Duration;

const ACCOUNT_COLUMNS: &str =
    "account_uuid, user_uuid, balance, currency, version, created_at, updated_at";

const TRANSFER_COLUMNS: &str = "transfer_uuid, from_account_uuid, to_account_uuid, amount, \
     currency, initiator_user_uuid, created_at";

const USER_COLUMNS: &str = "user_uuid, email, roles, active, version";

// =============================================================================
// Row mapping
// =============================================================================

fn amount_from_row(row: &PgRow, column: &str) -> Result<Amount, StoreError> {
    let value: Decimal = row.try_get(column)?;
    Amount::from_decimal(value)
        .map_err(|e| StoreError::Deserialization(format!("{}: {}", column, e)))
}

fn currency_from_row(row: &PgRow) -> Result<Currency, StoreError> {
    let code: String = row.try_get("currency")?;
    Currency::new(&code).map_err(|e| StoreError::Deserialization(e.to_string()))
}

fn account_from_row(row: &PgRow) -> Result<Account, StoreError> {
    Ok(Account {
        id: row.try_get("account_uuid")?,
        owner_id: row.try_get("user_uuid")?,
        balance: amount_from_row(row, "balance")?,
        currency: currency_from_row(row)?,
        version: row.try_get("version")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn transfer_from_row(row: &PgRow) -> Result<Transfer, StoreError> {
    Ok(Transfer {
        id: row.try_get("transfer_uuid")?,
        from_account_id: row.try_get("from_account_uuid")?,
        to_account_id: row.try_get("to_account_uuid")?,
        amount: amount_from_row(row, "amount")?,
        currency: currency_from_row(row)?,
        initiator_id: row.try_get("initiator_user_uuid")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    let Json(roles): Json<Vec<String>> = row.try_get("roles")?;
    Ok(User {
        id: row.try_get("user_uuid")?,
        email: row.try_get("email")?,
        roles,
        active: row.try_get("active")?,
        version: row.try_get("version")?,
    })
}

// =============================================================================
// PgStore
// =============================================================================

/// PostgreSQL-backed account store, ledger and user projection
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgStore {
    /// Create a store over `pool` with a bounded row-lock wait
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Get a reference to the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// One PostgreSQL transaction.
///
/// Dropping the transaction without commit rolls it back.
struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
    /// Version of each row as last read or written under its lock
    locked: HashMap<AccountId, i64>,
}

#[async_trait]
impl TransferLedger for PgUnitOfWork {
    async fn append(&mut self, transfer: &Transfer) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO transfers (
                transfer_uuid, from_account_uuid, to_account_uuid,
                amount, currency, initiator_user_uuid, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(transfer.id)
        .bind(transfer.from_account_id)
        .bind(transfer.to_account_id)
        .bind(transfer.amount.to_decimal())
        .bind(transfer.currency.code())
        .bind(transfer.initiator_id)
        .bind(transfer.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn lock_for_update(&mut self, id: AccountId) -> Result<Account, StoreError> {
        let query = format!(
            "SELECT {} FROM accounts WHERE account_uuid = $1 FOR UPDATE",
            ACCOUNT_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| {
                let err = StoreError::from(e);
                if matches!(err, StoreError::LockTimeout(_)) {
                    tracing::warn!(account_id = %id, "Account lock timed out");
                }
                err
            })?
            .ok_or_else(|| StoreError::not_found("Account", id.to_string()))?;

        let account = account_from_row(&row)?;
        self.locked.insert(id, account.version);
        Ok(account)
    }

    async fn save(&mut self, account: &Account) -> Result<(), StoreError> {
        match self.locked.get(&account.id) {
            Some(version) if *version == account.version => {},
            _ => return Err(StoreError::conflict("Account", account.id.to_string())),
        }

        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = $1, updated_at = $2, version = version + 1
            WHERE account_uuid = $3 AND version = $4
            "#,
        )
        .bind(account.balance.to_decimal())
        .bind(account.updated_at)
        .bind(account.id)
        .bind(account.version)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::conflict("Account", account.id.to_string()));
        }
        self.locked.insert(account.id, account.version + 1);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // SET does not accept bind parameters; the value is a plain integer
        let set_timeout =
            format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis());
        sqlx::query(&set_timeout).execute(&mut *tx).await?;

        Ok(Box::new(PgUnitOfWork {
            tx,
            locked: HashMap::new(),
        }))
    }

    async fn create_account(&self, account: &Account) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (
                account_uuid, user_uuid, balance, currency, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(account.id)
        .bind(account.owner_id)
        .bind(account.balance.to_decimal())
        .bind(account.currency.code())
        .bind(account.version)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let query = format!("SELECT {} FROM accounts WHERE account_uuid = $1", ACCOUNT_COLUMNS);
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_accounts_by_owner(&self, owner_id: UserId) -> Result<Vec<Account>, StoreError> {
        let query = format!(
            "SELECT {} FROM accounts WHERE user_uuid = $1 ORDER BY created_at, account_uuid",
            ACCOUNT_COLUMNS
        );
        let rows = sqlx::query(&query).bind(owner_id).fetch_all(&self.pool).await?;
        rows.iter().map(account_from_row).collect()
    }
}

#[async_trait]
impl LedgerReader for PgStore {
    async fn find_transfer(&self, id: TransferId) -> Result<Option<Transfer>, StoreError> {
        let query = format!("SELECT {} FROM transfers WHERE transfer_uuid = $1", TRANSFER_COLUMNS);
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(transfer_from_row).transpose()
    }

    async fn find_transfers_by_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Transfer>, StoreError> {
        let query = format!(
            "SELECT {} FROM transfers \
             WHERE from_account_uuid = $1 OR to_account_uuid = $1 \
             ORDER BY created_at DESC",
            TRANSFER_COLUMNS
        );
        let rows = sqlx::query(&query).bind(account_id).fetch_all(&self.pool).await?;
        rows.iter().map(transfer_from_row).collect()
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn find_active_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let query = format!(
            "SELECT {} FROM user_projection WHERE email = $1 AND active = TRUE",
            USER_COLUMNS
        );
        let row = sqlx::query(&query).bind(email).fetch_optional(&self.pool).await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_uuid(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {} FROM user_projection WHERE user_uuid = $1", USER_COLUMNS);
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(user_from_row).transpose()
    }
}

#[async_trait]
impl UserProjection for PgStore {
    async fn upsert_user(
        &self,
        id: UserId,
        email: &str,
        roles: &[String],
        version: Option<i64>,
    ) -> Result<ProjectionOutcome, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO user_projection (user_uuid, email, roles, active, version)
            VALUES ($1, $2, $3, TRUE, COALESCE($4::BIGINT, 0))
            ON CONFLICT (user_uuid) DO UPDATE
            SET email = EXCLUDED.email,
                roles = EXCLUDED.roles,
                active = TRUE,
                version = COALESCE($4::BIGINT, user_projection.version)
            WHERE $4::BIGINT IS NULL OR $4::BIGINT >= user_projection.version
            RETURNING user_uuid
            "#,
        )
        .bind(id)
        .bind(email)
        .bind(Json(roles.to_vec()))
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;

        Ok(if row.is_some() {
            ProjectionOutcome::Applied
        } else {
            ProjectionOutcome::Stale
        })
    }

    async fn deactivate_user(
        &self,
        id: UserId,
        version: Option<i64>,
    ) -> Result<ProjectionOutcome, StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE user_projection
            SET active = FALSE, version = COALESCE($2::BIGINT, version)
            WHERE user_uuid = $1 AND ($2::BIGINT IS NULL OR $2::BIGINT >= version)
            RETURNING user_uuid
            "#,
        )
        .bind(id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;

        if updated.is_some() {
            return Ok(ProjectionOutcome::Applied);
        }

        let exists = sqlx::query("SELECT 1 FROM user_projection WHERE user_uuid = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(if exists.is_some() {
            ProjectionOutcome::Stale
        } else {
            ProjectionOutcome::Missing
        })
    }
}

// =============================================================================
// PgIdempotencyGuard
// =============================================================================

/// Idempotency guard over the `idempotency_keys` table.
///
/// Check-and-mark is a single upsert that only overwrites expired rows, so
/// concurrent callers with the same key see exactly one `Fresh`.
#[derive(Clone)]
pub struct PgIdempotencyGuard {
    pool: PgPool,
    ttl: Duration,
}

impl PgIdempotencyGuard {
    /// Create a guard whose markers expire after `ttl`
    pub fn new(pool: PgPool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    /// Delete expired markers, returning how many were removed
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    fn ttl_secs(&self) -> f64 {
        self.ttl.as_secs_f64()
    }
}

#[async_trait]
impl IdempotencyGuard for PgIdempotencyGuard {
    async fn try_begin(&self, key: &str) -> Result<IdempotencyStatus, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (idempotency_key, state, expires_at)
            VALUES ($1, 'pending', NOW() + make_interval(secs => $2))
            ON CONFLICT (idempotency_key) DO UPDATE
            SET state = 'pending', expires_at = EXCLUDED.expires_at
            WHERE idempotency_keys.expires_at <= NOW()
            RETURNING idempotency_key
            "#,
        )
        .bind(key)
        .bind(self.ttl_secs())
        .fetch_optional(&self.pool)
        .await?;

        Ok(if row.is_some() {
            IdempotencyStatus::Fresh
        } else {
            IdempotencyStatus::Duplicate
        })
    }

    async fn complete(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_keys (idempotency_key, state, expires_at)
            VALUES ($1, 'completed', NOW() + make_interval(secs => $2))
            ON CONFLICT (idempotency_key) DO UPDATE
            SET state = 'completed', expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(self.ttl_secs())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn abort(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM idempotency_keys WHERE idempotency_key = $1 AND state = 'pending'")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
