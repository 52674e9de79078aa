//! End-to-end transfer scenarios over the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use fundflow_engine::{Initiator, TransferEngine, TransferError, TransferRequest};
use fundflow_store::{scoped_key, IdempotencyGuard, LedgerReader, MemoryIdempotencyGuard};
use fundflow_testkit::{assert_total_balance, inr, Ledger};

type Result<T> = anyhow::Result<T>;

fn engine_for(ledger: &Ledger) -> TransferEngine {
    engine_with_guard(ledger).0
}

fn engine_with_guard(ledger: &Ledger) -> (TransferEngine, Arc<MemoryIdempotencyGuard>) {
    let guard = Arc::new(MemoryIdempotencyGuard::new(Duration::from_secs(60)));
    let engine =
        TransferEngine::new(Arc::new(ledger.store.clone()), Arc::new(ledger.store.clone()), guard.clone());
    (engine, guard)
}

async fn alice_and_bob() -> Result<Ledger> {
    Ledger::new()
        .with_user("alice", "alice@example.com")
        .with_user("bob", "bob@example.com")
        .with_account("a", "alice", "1000.00", "INR")
        .await?
        .with_account("b", "bob", "500.00", "INR")
        .await
}

fn as_alice(ledger: &Ledger) -> Initiator {
    Initiator::Email(ledger.user("alice").email.clone())
}

/// Scenario A: straightforward transfer moves money and records it.
#[tokio::test]
async fn test_scenario_a_successful_transfer() -> Result<()> {
    let ledger = alice_and_bob().await?;
    let engine = engine_for(&ledger);

    let request =
        TransferRequest::new(ledger.account("a"), ledger.account("b"), "250.00", "INR", as_alice(&ledger));
    let transfer = engine.execute(request).await?;

    assert_eq!(ledger.balance("a").await?, "750.00");
    assert_eq!(ledger.balance("b").await?, "750.00");
    assert_eq!(transfer.status().as_str(), "completed");
    assert_eq!(transfer.from_account_id, ledger.account("a"));
    assert_eq!(transfer.to_account_id, ledger.account("b"));
    assert_total_balance(&ledger.store, &inr(), "1500.00");

    let history = ledger.store.find_transfers_by_account(ledger.account("b")).await?;
    assert_eq!(history, vec![transfer]);
    Ok(())
}

/// Scenario B: debiting someone else's account is forbidden.
#[tokio::test]
async fn test_scenario_b_not_owner() -> Result<()> {
    let ledger = alice_and_bob().await?;
    let engine = engine_for(&ledger);

    let request =
        TransferRequest::new(ledger.account("b"), ledger.account("a"), "100.00", "INR", as_alice(&ledger));
    let err = engine.execute(request).await.unwrap_err();

    assert!(matches!(err, TransferError::Forbidden { .. }));
    assert_eq!(err.code(), "forbidden");
    assert_eq!(ledger.balance("a").await?, "1000.00");
    assert_eq!(ledger.balance("b").await?, "500.00");
    assert_eq!(ledger.store.transfer_count(), 0);
    Ok(())
}

/// Scenario C: overdraft is rejected and nothing moves.
#[tokio::test]
async fn test_scenario_c_insufficient_balance() -> Result<()> {
    let ledger = Ledger::new()
        .with_user("alice", "alice@example.com")
        .with_user("bob", "bob@example.com")
        .with_account("a", "alice", "50.00", "INR")
        .await?
        .with_account("b", "bob", "500.00", "INR")
        .await?;
    let engine = engine_for(&ledger);

    let request =
        TransferRequest::new(ledger.account("a"), ledger.account("b"), "250.00", "INR", as_alice(&ledger));
    let err = engine.execute(request).await.unwrap_err();

    match err {
        TransferError::InsufficientBalance { available, requested } => {
            assert_eq!(available.to_string(), "50.00");
            assert_eq!(requested.to_string(), "250.00");
        },
        other => panic!("expected insufficient balance, got {:?}", other),
    }
    assert_eq!(ledger.balance("a").await?, "50.00");
    assert_eq!(ledger.store.transfer_count(), 0);
    Ok(())
}

/// Scenario D: transferring to the same account is a malformed request.
#[tokio::test]
async fn test_scenario_d_self_transfer() -> Result<()> {
    let ledger = alice_and_bob().await?;
    let engine = engine_for(&ledger);

    let request =
        TransferRequest::new(ledger.account("a"), ledger.account("a"), "10.00", "INR", as_alice(&ledger));
    let err = engine.execute(request).await.unwrap_err();

    assert!(matches!(err, TransferError::InvalidRequest(_)));
    assert_eq!(ledger.balance("a").await?, "1000.00");
    Ok(())
}

/// Scenario E: concurrent submissions with one idempotency key execute once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scenario_e_concurrent_identical_keys() -> Result<()> {
    let ledger = alice_and_bob().await?;
    let engine = engine_for(&ledger);

    let request =
        TransferRequest::new(ledger.account("a"), ledger.account("b"), "250.00", "INR", as_alice(&ledger))
            .with_idempotency_key("client-key-1");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            let request = request.clone();
            tokio::spawn(async move { engine.execute(request).await })
        })
        .collect();

    let mut completed = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => completed += 1,
            Err(TransferError::DuplicateRequest) => duplicates += 1,
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert_eq!(completed, 1);
    assert_eq!(duplicates, 7);
    assert_eq!(ledger.balance("a").await?, "750.00");
    assert_eq!(ledger.balance("b").await?, "750.00");
    assert_eq!(ledger.store.transfer_count(), 1);

    // A later retry with the same key is still a duplicate
    let err = engine.execute(request).await.unwrap_err();
    assert!(matches!(err, TransferError::DuplicateRequest));
    Ok(())
}

/// Precision: many small transfers stay exact.
#[tokio::test]
async fn test_minor_unit_arithmetic_is_exact() -> Result<()> {
    let ledger = alice_and_bob().await?;
    let engine = engine_for(&ledger);

    for _ in 0..10 {
        let request =
            TransferRequest::new(ledger.account("a"), ledger.account("b"), "0.10", "INR", as_alice(&ledger));
        engine.execute(request).await?;
    }

    assert_eq!(ledger.balance("a").await?, "999.00");
    assert_eq!(ledger.balance("b").await?, "501.00");
    assert_total_balance(&ledger.store, &inr(), "1500.00");
    Ok(())
}

/// When a request breaks two rules, the earlier validation step decides the error.
#[tokio::test]
async fn test_first_violation_wins() -> Result<()> {
    let ledger = alice_and_bob().await?;
    let (engine, guard) = engine_with_guard(&ledger);
    let (a, b) = (ledger.account("a"), ledger.account("b"));
    let missing = uuid::Uuid::new_v4();
    let eve = Initiator::Email("eve@example.com".to_string());

    // A key already in flight for the unknown initiator
    guard.try_begin(&scoped_key(&eve.scope(), "held")).await?;

    let cases = vec![
        (
            "duplicate key before unknown initiator",
            TransferRequest::new(a, b, "1.00", "INR", eve.clone()).with_idempotency_key("held"),
            "duplicate_request",
        ),
        (
            "unknown initiator before self-transfer",
            TransferRequest::new(a, a, "1.00", "INR", eve.clone()),
            "unauthorized_initiator",
        ),
        (
            "self-transfer before bad amount",
            TransferRequest::new(a, a, "1.005", "INR", as_alice(&ledger)),
            "invalid_request",
        ),
        (
            "missing account before currency mismatch",
            TransferRequest::new(a, missing, "1.00", "USD", as_alice(&ledger)),
            "account_not_found",
        ),
        (
            "currency mismatch before not owner",
            TransferRequest::new(b, a, "1.00", "USD", as_alice(&ledger)),
            "currency_mismatch",
        ),
        (
            "not owner before insufficient balance",
            TransferRequest::new(b, a, "600.00", "INR", as_alice(&ledger)),
            "forbidden",
        ),
    ];

    for (name, request, expected) in cases {
        let err = engine.execute(request).await.unwrap_err();
        assert_eq!(err.code(), expected, "{}: got {:?}", name, err);
        if name.starts_with("self-transfer") {
            assert!(err.to_string().contains("same account"), "{}: got {}", name, err);
        }
    }

    assert_eq!(ledger.balance("a").await?, "1000.00");
    assert_eq!(ledger.balance("b").await?, "500.00");
    assert_eq!(ledger.store.transfer_count(), 0);
    Ok(())
}
