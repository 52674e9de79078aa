//! Concurrency properties: conservation, no overdraft, deadlock freedom.

use std::sync::Arc;
use std::time::Duration;

use fundflow_engine::{Initiator, TransferEngine, TransferError, TransferRequest};
use fundflow_store::{AccountStore, MemoryIdempotencyGuard, MemoryStore};
use fundflow_testkit::{assert_total_balance, inr, Ledger};

type Result<T> = anyhow::Result<T>;

fn engine_for(store: &MemoryStore) -> TransferEngine {
    let guard = Arc::new(MemoryIdempotencyGuard::new(Duration::from_secs(60)));
    TransferEngine::new(Arc::new(store.clone()), Arc::new(store.clone()), guard)
}

/// Opposite-direction transfers between the same pair never deadlock: with
/// canonical lock order every task finishes well inside the lock timeout.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_directions_do_not_deadlock() -> Result<()> {
    let ledger = Ledger::with_store(MemoryStore::with_lock_timeout(Duration::from_secs(2)))
        .with_user("alice", "alice@example.com")
        .with_user("bob", "bob@example.com")
        .with_account("a", "alice", "1000.00", "INR")
        .await?
        .with_account("b", "bob", "1000.00", "INR")
        .await?;
    let engine = engine_for(&ledger.store);

    let (a, b) = (ledger.account("a"), ledger.account("b"));
    let alice = Initiator::Email("alice@example.com".into());
    let bob = Initiator::Email("bob@example.com".into());

    let mut handles = Vec::new();
    for i in 0..100 {
        let engine = engine.clone();
        let request = if i % 2 == 0 {
            TransferRequest::new(a, b, "1.00", "INR", alice.clone())
        } else {
            TransferRequest::new(b, a, "1.00", "INR", bob.clone())
        };
        handles.push(tokio::spawn(async move { engine.execute(request).await }));
    }

    let all = join_all(handles);
    let results = tokio::time::timeout(Duration::from_secs(30), all).await?;
    for result in results {
        result?;
    }

    assert_eq!(ledger.balance("a").await?, "1000.00");
    assert_eq!(ledger.balance("b").await?, "1000.00");
    assert_eq!(ledger.store.transfer_count(), 100);
    Ok(())
}

/// Random-ish transfers across a ring of accounts conserve the total and
/// never take a balance below zero.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_conservation_under_contention() -> Result<()> {
    let mut ledger = Ledger::new();
    for i in 0..5 {
        ledger = ledger
            .with_user(&format!("u{}", i), &format!("user{}@example.com", i))
            .with_account(&format!("acc{}", i), &format!("u{}", i), "100.00", "INR")
            .await?;
    }
    let engine = engine_for(&ledger.store);

    let mut handles = Vec::new();
    for n in 0..200usize {
        let from = n % 5;
        let to = (n * 3 + 1) % 5;
        if from == to {
            continue;
        }
        let request = TransferRequest::new(
            ledger.account(&format!("acc{}", from)),
            ledger.account(&format!("acc{}", to)),
            format!("{}.{:02}", n % 40 + 1, n % 100),
            "INR",
            Initiator::UserId(ledger.user(&format!("u{}", from)).id),
        );
        let engine = engine.clone();
        handles.push(tokio::spawn(async move { engine.execute(request).await }));
    }

    for result in join_all(handles).await {
        match result {
            Ok(_) | Err(TransferError::InsufficientBalance { .. }) => {},
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert_total_balance(&ledger.store, &inr(), "500.00");
    for i in 0..5 {
        let account = ledger
            .store
            .find_account(ledger.account(&format!("acc{}", i)))
            .await?
            .ok_or_else(|| anyhow::anyhow!("account missing"))?;
        assert!(account.balance.minor_units() >= 0);
    }
    Ok(())
}

/// Draining one account from many tasks at once stops exactly at zero.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_drain_never_overdraws() -> Result<()> {
    let ledger = Ledger::new()
        .with_user("alice", "alice@example.com")
        .with_user("bob", "bob@example.com")
        .with_account("a", "alice", "10.00", "INR")
        .await?
        .with_account("b", "bob", "0.00", "INR")
        .await?;
    let engine = engine_for(&ledger.store);

    let handles: Vec<_> = (0..25)
        .map(|_| {
            let engine = engine.clone();
            let request = TransferRequest::new(
                ledger.account("a"),
                ledger.account("b"),
                "1.00",
                "INR",
                Initiator::Email("alice@example.com".into()),
            );
            tokio::spawn(async move { engine.execute(request).await })
        })
        .collect();

    let mut completed = 0;
    for result in join_all(handles).await {
        match result {
            Ok(_) => completed += 1,
            Err(TransferError::InsufficientBalance { .. }) => {},
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert_eq!(completed, 10);
    assert_eq!(ledger.balance("a").await?, "0.00");
    assert_eq!(ledger.balance("b").await?, "10.00");
    Ok(())
}

/// A dropped caller future does not abandon the unit of work.
#[tokio::test]
async fn test_dropped_caller_still_completes() -> Result<()> {
    let ledger = Ledger::new()
        .with_user("alice", "alice@example.com")
        .with_user("bob", "bob@example.com")
        .with_account("a", "alice", "10.00", "INR")
        .await?
        .with_account("b", "bob", "0.00", "INR")
        .await?;
    let engine = engine_for(&ledger.store);

    let request = TransferRequest::new(
        ledger.account("a"),
        ledger.account("b"),
        "4.00",
        "INR",
        Initiator::Email("alice@example.com".into()),
    );

    // Poll once, then drop the caller's future
    {
        let fut = engine.execute(request);
        tokio::pin!(fut);
        let _ = poll_once(fut.as_mut()).await;
    }

    for _ in 0..100 {
        if ledger.store.transfer_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(ledger.store.transfer_count(), 1);
    assert_eq!(ledger.balance("a").await?, "6.00");
    assert_total_balance(&ledger.store, &inr(), "10.00");
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

async fn join_all<T>(handles: Vec<tokio::task::JoinHandle<T>>) -> Vec<T> {
    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        out.push(handle.await.expect("transfer task panicked"));
    }
    out
}

async fn poll_once<F: std::future::Future + Unpin>(fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        out = fut => Some(out),
        _ = std::future::ready(()) => None,
    }
}
