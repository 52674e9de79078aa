//! DB-backed integration tests for the PostgreSQL adapters.
//!
//! Run with `DATABASE_URL` set and `--features postgres -- --ignored`.

#![cfg(feature = "postgres")]

use std::time::Duration;

use fundflow_domain::{Account, Amount, Currency, Money, Transfer, User};
use fundflow_store::{
    AccountStore, IdempotencyGuard, IdempotencyStatus, LedgerReader, PgIdempotencyGuard, PgStore,
    ProjectionOutcome, StoreError, UserDirectory, UserProjection,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::PgPool;
use uuid::Uuid;

type Result<T> = anyhow::Result<T>;

async fn seed_user(store: &PgStore, email: &str) -> Result<User> {
    let user = User::new(Uuid::new_v4(), email, vec!["ROLE_USER".to_string()]);
    store.upsert_user(user.id, &user.email, &user.roles, None).await?;
    Ok(user)
}

async fn seed_account(store: &PgStore, owner: &User, balance: &str) -> Result<Account> {
    let account = Account::open(owner.id, Currency::inr(), Amount::parse(balance)?);
    store.create_account(&account).await?;
    Ok(account)
}

async fn balance(pool: &PgPool, id: Uuid) -> Result<Decimal> {
    Ok(sqlx::query_scalar("SELECT balance FROM accounts WHERE account_uuid = $1")
        .bind(id)
        .fetch_one(pool)
        .await?)
}

#[sqlx::test(migrations = "../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_unit_of_work_commit_moves_money(pool: PgPool) -> Result<()> {
    let store = PgStore::new(pool.clone(), Duration::from_secs(2));
    let alice = seed_user(&store, "alice@example.com").await?;
    let bob = seed_user(&store, "bob@example.com").await?;
    let from = seed_account(&store, &alice, "1000.00").await?;
    let to = seed_account(&store, &bob, "500.00").await?;

    let money = Money::parse("250.00", "INR")?;
    let mut uow = store.begin().await?;
    let mut debited = uow.lock_for_update(from.id).await?;
    let mut credited = uow.lock_for_update(to.id).await?;
    debited.debit(&money)?;
    credited.credit(&money)?;
    uow.save(&debited).await?;
    uow.save(&credited).await?;
    let transfer = Transfer::new(from.id, to.id, money, alice.id);
    uow.append(&transfer).await?;
    uow.commit().await?;

    assert_eq!(balance(&pool, from.id).await?, dec!(750.00));
    assert_eq!(balance(&pool, to.id).await?, dec!(750.00));

    let stored = store.find_transfer(transfer.id).await?.ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(stored.amount.to_string(), "250.00");
    assert_eq!(store.find_transfers_by_account(to.id).await?.len(), 1);

    let reloaded = store.find_account(from.id).await?.ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(reloaded.version, from.version + 1);
    Ok(())
}

#[sqlx::test(migrations = "../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_rollback_discards_changes(pool: PgPool) -> Result<()> {
    let store = PgStore::new(pool.clone(), Duration::from_secs(2));
    let alice = seed_user(&store, "alice@example.com").await?;
    let account = seed_account(&store, &alice, "10.00").await?;

    let mut uow = store.begin().await?;
    let mut locked = uow.lock_for_update(account.id).await?;
    locked.debit(&Money::parse("4.00", "INR")?)?;
    uow.save(&locked).await?;
    uow.rollback().await?;

    assert_eq!(balance(&pool, account.id).await?, dec!(10.00));
    Ok(())
}

#[sqlx::test(migrations = "../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_second_lock_times_out(pool: PgPool) -> Result<()> {
    let store = PgStore::new(pool.clone(), Duration::from_millis(200));
    let alice = seed_user(&store, "alice@example.com").await?;
    let account = seed_account(&store, &alice, "10.00").await?;

    let mut holder = store.begin().await?;
    holder.lock_for_update(account.id).await?;

    let mut waiter = store.begin().await?;
    let err = waiter.lock_for_update(account.id).await.unwrap_err();
    assert!(matches!(err, StoreError::LockTimeout(_)), "unexpected {:?}", err);

    waiter.rollback().await?;
    holder.rollback().await?;
    Ok(())
}

#[sqlx::test(migrations = "../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_missing_account_is_not_found(pool: PgPool) -> Result<()> {
    let store = PgStore::new(pool, Duration::from_secs(1));
    let mut uow = store.begin().await?;

    let err = uow.lock_for_update(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
    Ok(())
}

#[sqlx::test(migrations = "../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_user_projection_versioning(pool: PgPool) -> Result<()> {
    let store = PgStore::new(pool, Duration::from_secs(1));
    let id = Uuid::new_v4();
    let roles = vec!["ROLE_USER".to_string()];

    let outcome = store.upsert_user(id, "carol@example.com", &roles, Some(3)).await?;
    assert_eq!(outcome, ProjectionOutcome::Applied);

    let outcome = store.upsert_user(id, "stale@example.com", &roles, Some(2)).await?;
    assert_eq!(outcome, ProjectionOutcome::Stale);

    let user = store.find_user_by_uuid(id).await?.ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(user.email, "carol@example.com");
    assert_eq!(user.version, 3);

    assert_eq!(store.deactivate_user(id, None).await?, ProjectionOutcome::Applied);
    assert!(store.find_active_user_by_email("carol@example.com").await?.is_none());
    assert_eq!(
        store.deactivate_user(Uuid::new_v4(), None).await?,
        ProjectionOutcome::Missing
    );
    Ok(())
}

#[sqlx::test(migrations = "../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_idempotency_guard_lifecycle(pool: PgPool) -> Result<()> {
    let guard = PgIdempotencyGuard::new(pool, Duration::from_secs(60));

    assert_eq!(guard.try_begin("idem_a").await?, IdempotencyStatus::Fresh);
    assert_eq!(guard.try_begin("idem_a").await?, IdempotencyStatus::Duplicate);

    guard.abort("idem_a").await?;
    assert_eq!(guard.try_begin("idem_a").await?, IdempotencyStatus::Fresh);

    guard.complete("idem_a").await?;
    guard.abort("idem_a").await?;
    assert_eq!(guard.try_begin("idem_a").await?, IdempotencyStatus::Duplicate);

    assert_eq!(guard.purge_expired().await?, 0);
    Ok(())
}
