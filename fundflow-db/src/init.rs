//! Demo data initialization for Fundflow.
//!
//! Seeds two projected users with one funded account each, so transfers can
//! be exercised right after `migrate`.

use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use super::Result;

/// Identifiers created (or found) by [`init_demo_data`]
#[derive(Debug, Clone, Copy)]
pub struct DemoData {
    pub alice_user: Uuid,
    pub alice_account: Uuid,
    pub bob_user: Uuid,
    pub bob_account: Uuid,
}

/// Initialize demo users and accounts.
///
/// Idempotent: users are matched by email and an existing account in
/// `currency` is reused instead of opening another.
pub async fn init_demo_data(pool: &PgPool, currency: &str) -> Result<DemoData> {
    let mut tx = pool.begin().await?;

    let alice_user = ensure_user(&mut tx, "alice@example.com").await?;
    let bob_user = ensure_user(&mut tx, "bob@example.com").await?;
    let alice_account = ensure_account(&mut tx, alice_user, currency, Decimal::new(100_000, 2)).await?;
    let bob_account = ensure_account(&mut tx, bob_user, currency, Decimal::new(50_000, 2)).await?;

    tx.commit().await?;

    info!(%alice_account, %bob_account, currency, "Demo data initialized successfully");
    Ok(DemoData {
        alice_user,
        alice_account,
        bob_user,
        bob_account,
    })
}

async fn ensure_user(tx: &mut Transaction<'_, Postgres>, email: &str) -> Result<Uuid> {
    let user_uuid: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO user_projection (user_uuid, email, roles, active, version)
        VALUES ($1, $2, '["ROLE_USER"]'::jsonb, TRUE, 0)
        ON CONFLICT (email) DO UPDATE SET active = TRUE
        RETURNING user_uuid
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(email)
    .fetch_one(&mut **tx)
    .await?;

    Ok(user_uuid)
}

async fn ensure_account(
    tx: &mut Transaction<'_, Postgres>,
    user_uuid: Uuid,
    currency: &str,
    opening_balance: Decimal,
) -> Result<Uuid> {
    let existing: Option<Uuid> = sqlx::query_scalar(
        "SELECT account_uuid FROM accounts WHERE user_uuid = $1 AND currency = $2 LIMIT 1",
    )
    .bind(user_uuid)
    .bind(currency)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(account_uuid) = existing {
        info!(%user_uuid, %account_uuid, "Demo account already exists");
        return Ok(account_uuid);
    }

    let account_uuid = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO accounts (account_uuid, user_uuid, balance, currency, version, created_at, updated_at)
        VALUES ($1, $2, $3, $4, 0, NOW(), NOW())
        "#,
    )
    .bind(account_uuid)
    .bind(user_uuid)
    .bind(opening_balance)
    .bind(currency)
    .execute(&mut **tx)
    .await?;

    info!(%user_uuid, %account_uuid, balance = %opening_balance, "Demo account created");
    Ok(account_uuid)
}
