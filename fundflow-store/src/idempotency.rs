//! Idempotency guard
//!
//! Short-lived, best-effort deduplication of client retries. Keys are
//! scoped per caller and hashed before storage so raw client input never
//! becomes a cache key.

use crate::error::StoreError;
use crate::repository::{IdempotencyGuard, IdempotencyStatus};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Purge expired entries once the map grows past this size
const PURGE_THRESHOLD: usize = 1024;

/// Derive the stored key for a client-supplied idempotency key.
///
/// Format: `idem_` followed by the hex SHA-256 of `scope`, a NUL separator
/// and `key`. Two callers reusing the same raw key never collide.
///
/// ```
/// use fundflow_store::scoped_key;
///
/// let a = scoped_key("alice@example.com", "k1");
/// let b = scoped_key("bob@example.com", "k1");
/// assert_ne!(a, b);
/// assert!(a.starts_with("idem_"));
/// ```
pub fn scoped_key(scope: &str, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scope.as_bytes());
    hasher.update([0u8]);
    hasher.update(key.as_bytes());
    format!("idem_{}", hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyState {
    Pending,
    Completed,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    state: KeyState,
    expires_at: Instant,
}

/// In-process idempotency guard with a fixed time-to-live.
///
/// Check-and-mark happens under one mutex, so concurrent callers with the
/// same key see exactly one `Fresh`.
pub struct MemoryIdempotencyGuard {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
}

impl MemoryIdempotencyGuard {
    /// Create a guard whose markers expire after `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Time-to-live applied to new and completed markers
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of unexpired markers
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|e| e.expires_at > now).count()
    }

    /// Check if no unexpired markers exist
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_sync(&self, key: &str) -> IdempotencyStatus {
        let now = Instant::now();
        let mut entries = self.lock();

        if entries.len() >= PURGE_THRESHOLD {
            entries.retain(|_, e| e.expires_at > now);
        }

        match entries.get(key) {
            Some(entry) if entry.expires_at > now => IdempotencyStatus::Duplicate,
            _ => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        state: KeyState::Pending,
                        expires_at: now + self.ttl,
                    },
                );
                IdempotencyStatus::Fresh
            },
        }
    }
}

impl Default for MemoryIdempotencyGuard {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[async_trait]
impl IdempotencyGuard for MemoryIdempotencyGuard {
    async fn try_begin(&self, key: &str) -> Result<IdempotencyStatus, StoreError> {
        Ok(self.begin_sync(key))
    }

    async fn complete(&self, key: &str) -> Result<(), StoreError> {
        let expires_at = Instant::now() + self.ttl;
        self.lock().insert(
            key.to_string(),
            Entry {
                state: KeyState::Completed,
                expires_at,
            },
        );
        Ok(())
    }

    async fn abort(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.lock();
        if matches!(entries.get(key), Some(e) if e.state == KeyState::Pending) {
            entries.remove(key);
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_scoped_key_is_stable_and_scoped() {
        let a1 = scoped_key("alice@example.com", "abc");
        let a2 = scoped_key("alice@example.com", "abc");
        let b = scoped_key("bob@example.com", "abc");

        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert_eq!(a1.len(), "idem_".len() + 64);
    }

    #[test]
    fn test_scoped_key_separator_prevents_ambiguity() {
        assert_ne!(scoped_key("ab", "c"), scoped_key("a", "bc"));
    }

    #[tokio::test]
    async fn test_try_begin_then_duplicate() {
        let guard = MemoryIdempotencyGuard::new(Duration::from_secs(60));

        assert_eq!(guard.try_begin("k").await.unwrap(), IdempotencyStatus::Fresh);
        assert_eq!(guard.try_begin("k").await.unwrap(), IdempotencyStatus::Duplicate);

        guard.complete("k").await.unwrap();
        assert_eq!(guard.try_begin("k").await.unwrap(), IdempotencyStatus::Duplicate);
    }

    #[tokio::test]
    async fn test_abort_allows_retry() {
        let guard = MemoryIdempotencyGuard::new(Duration::from_secs(60));

        assert_eq!(guard.try_begin("k").await.unwrap(), IdempotencyStatus::Fresh);
        guard.abort("k").await.unwrap();
        assert_eq!(guard.try_begin("k").await.unwrap(), IdempotencyStatus::Fresh);
    }

    #[tokio::test]
    async fn test_abort_keeps_completed_marker() {
        let guard = MemoryIdempotencyGuard::new(Duration::from_secs(60));

        guard.try_begin("k").await.unwrap();
        guard.complete("k").await.unwrap();
        guard.abort("k").await.unwrap();

        assert_eq!(guard.try_begin("k").await.unwrap(), IdempotencyStatus::Duplicate);
    }

    #[tokio::test(start_paused = true)]
    async fn test_marker_expires_after_ttl() {
        let guard = MemoryIdempotencyGuard::new(Duration::from_secs(60));

        guard.try_begin("k").await.unwrap();
        guard.complete("k").await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(guard.try_begin("k").await.unwrap(), IdempotencyStatus::Duplicate);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(guard.try_begin("k").await.unwrap(), IdempotencyStatus::Fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_refreshes_ttl() {
        let guard = MemoryIdempotencyGuard::new(Duration::from_secs(60));

        guard.try_begin("k").await.unwrap();
        tokio::time::advance(Duration::from_secs(50)).await;
        guard.complete("k").await.unwrap();
        tokio::time::advance(Duration::from_secs(50)).await;

        assert_eq!(guard.try_begin("k").await.unwrap(), IdempotencyStatus::Duplicate);
        assert_eq!(guard.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_try_begin_single_winner() {
        let guard = Arc::new(MemoryIdempotencyGuard::new(Duration::from_secs(60)));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let guard = guard.clone();
                tokio::spawn(async move { guard.try_begin("same").await.unwrap() })
            })
            .collect();

        let mut fresh = 0;
        for handle in handles {
            if handle.await.unwrap() == IdempotencyStatus::Fresh {
                fresh += 1;
            }
        }
        assert_eq!(fresh, 1);
    }
}
