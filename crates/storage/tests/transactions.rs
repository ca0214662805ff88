//! Transaction conflict detection and atomicity tests for `MemoryBackend`.
//!
//! Covers compare-and-set conflicts between transactions, bare read
//! preconditions, all-or-nothing commits and the retry helper under
//! concurrent writers.

#![allow(clippy::expect_used, clippy::panic)]

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use appstore_storage::{CasRetryConfig, MemoryBackend, StorageBackend, StorageError, with_cas_retry};
use bytes::Bytes;
use tokio::task::JoinSet;

// ============================================================================
// Conflict detection
// ============================================================================

/// Two transactions with CAS on the same key; the second commit conflicts.
#[tokio::test]
async fn second_transaction_on_same_key_conflicts() {
    let backend = MemoryBackend::new();
    backend.set(b"container/c1/meta.json".to_vec(), b"v1".to_vec()).await.expect("initial set");

    let mut txn_a = backend.transaction().await.expect("txn_a");
    txn_a
        .compare_and_set(b"container/c1/meta.json".to_vec(), Some(b"v1".to_vec()), b"v2".to_vec())
        .expect("txn_a CAS buffer");

    let mut txn_b = backend.transaction().await.expect("txn_b");
    txn_b
        .compare_and_set(b"container/c1/meta.json".to_vec(), Some(b"v1".to_vec()), b"v3".to_vec())
        .expect("txn_b CAS buffer");

    txn_a.commit().await.expect("first commit");
    let result = txn_b.commit().await;
    assert!(matches!(result, Err(StorageError::Conflict)), "got {result:?}");

    let value = backend.get(b"container/c1/meta.json").await.expect("get");
    assert_eq!(value, Some(Bytes::from("v2")));
}

/// Insert-if-absent from two transactions; only the first creates the key.
#[tokio::test]
async fn insert_if_absent_has_one_winner() {
    let backend = MemoryBackend::new();
    let key = b"app/a1/ver/1.0.0".to_vec();

    let mut txn_a = backend.transaction().await.expect("txn_a");
    txn_a.compare_and_set(key.clone(), None, b"a".to_vec()).expect("buffer");
    let mut txn_b = backend.transaction().await.expect("txn_b");
    txn_b.compare_and_set(key.clone(), None, b"b".to_vec()).expect("buffer");

    txn_a.commit().await.expect("first insert");
    assert!(matches!(txn_b.commit().await, Err(StorageError::Conflict)));
    assert_eq!(backend.get(&key).await.expect("get"), Some(Bytes::from("a")));
}

/// Many concurrent transactions racing on one key: exactly one commits.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cas_has_exactly_one_winner() {
    const CONCURRENCY: usize = 16;

    let backend = MemoryBackend::new();
    let mut set = JoinSet::new();
    for task_id in 0..CONCURRENCY {
        let backend = backend.clone();
        set.spawn(async move {
            let mut txn = backend.transaction().await.expect("txn");
            txn.compare_and_set(
                b"app/a1/ver/2.0".to_vec(),
                None,
                format!("writer-{task_id}").into_bytes(),
            )
            .expect("buffer");
            txn.commit().await.is_ok()
        });
    }

    let mut winners = 0;
    while let Some(joined) = set.join_next().await {
        if joined.expect("task panicked") {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

// ============================================================================
// Read preconditions
// ============================================================================

/// A bare check passes when the key is unchanged and writes nothing.
#[tokio::test]
async fn check_without_write_leaves_key_untouched() {
    let backend = MemoryBackend::new();
    backend.set(b"app/a1/member/u1".to_vec(), b"owner".to_vec()).await.expect("set");

    let mut txn = backend.transaction().await.expect("txn");
    txn.check(b"app/a1/member/u1".to_vec(), Some(b"owner".to_vec()));
    txn.check(b"app/a1/member/u2".to_vec(), None);
    txn.set(b"app/a1/member/u2".to_vec(), b"dev".to_vec());
    txn.commit().await.expect("commit");

    assert_eq!(backend.get(b"app/a1/member/u1").await.expect("get"), Some(Bytes::from("owner")));
    assert_eq!(backend.get(b"app/a1/member/u2").await.expect("get"), Some(Bytes::from("dev")));
}

/// A key that appears after it was read as absent fails the check.
#[tokio::test]
async fn check_of_absent_key_detects_creation() {
    let backend = MemoryBackend::new();

    let mut txn = backend.transaction().await.expect("txn");
    assert_eq!(txn.get(b"app/a1/approve/c1").await.expect("read"), None);
    txn.check(b"app/a1/approve/c1".to_vec(), None);
    txn.set(b"app/a1/info.json".to_vec(), b"x".to_vec());

    backend.set(b"app/a1/approve/c1".to_vec(), b"{}".to_vec()).await.expect("racing write");

    assert!(matches!(txn.commit().await, Err(StorageError::Conflict)));
    assert_eq!(backend.get(b"app/a1/info.json").await.expect("get"), None);
}

// ============================================================================
// Atomicity
// ============================================================================

/// A failed precondition discards every buffered write.
#[tokio::test]
async fn failed_precondition_rolls_back_unconditional_writes() {
    let backend = MemoryBackend::new();
    backend.set(b"container/c1/meta.json".to_vec(), b"v2".to_vec()).await.expect("set");

    let mut txn = backend.transaction().await.expect("txn");
    txn.set(b"container/c1/member/u2".to_vec(), b"member".to_vec());
    txn.delete(b"container/c1/meta.json".to_vec());
    txn.compare_and_set(b"container/c1/meta.json".to_vec(), Some(b"v1".to_vec()), b"v3".to_vec())
        .expect("buffer");

    assert!(matches!(txn.commit().await, Err(StorageError::Conflict)));
    assert_eq!(backend.get(b"container/c1/member/u2").await.expect("get"), None);
    assert_eq!(backend.get(b"container/c1/meta.json").await.expect("get"), Some(Bytes::from("v2")));
}

/// Buffered writes are visible to reads inside the same transaction only.
#[tokio::test]
async fn transaction_reads_its_own_writes() {
    let backend = MemoryBackend::new();

    let mut txn = backend.transaction().await.expect("txn");
    txn.set(b"user/u1/own/app/a1".to_vec(), b"{}".to_vec());
    assert_eq!(txn.get(b"user/u1/own/app/a1").await.expect("read"), Some(Bytes::from("{}")));
    assert_eq!(backend.get(b"user/u1/own/app/a1").await.expect("outside read"), None);

    txn.commit().await.expect("commit");
    assert_eq!(backend.get(b"user/u1/own/app/a1").await.expect("get"), Some(Bytes::from("{}")));
}

// ============================================================================
// Retry helper
// ============================================================================

/// Concurrent read-modify-write increments through the retry helper lose no
/// update.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn retried_increments_lose_no_update() {
    const WRITERS: u32 = 8;

    let backend = MemoryBackend::new();
    backend.set(b"container/c1/ver".to_vec(), b"0".to_vec()).await.expect("set");
    let config = CasRetryConfig { max_retries: 64, ..CasRetryConfig::default() };
    let attempts = Arc::new(AtomicU32::new(0));

    let mut set = JoinSet::new();
    for _ in 0..WRITERS {
        let backend = backend.clone();
        let attempts = Arc::clone(&attempts);
        set.spawn(async move {
            with_cas_retry(&config, || {
                let backend = backend.clone();
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.fetch_add(1, Ordering::Relaxed);
                    let current = backend.get(b"container/c1/ver").await?.expect("present");
                    let n: u32 = std::str::from_utf8(&current)
                        .expect("utf8")
                        .parse()
                        .expect("number");
                    backend
                        .compare_and_set(
                            b"container/c1/ver",
                            Some(&current[..]),
                            (n + 1).to_string().into_bytes(),
                        )
                        .await
                }
            })
            .await
        });
    }
    while let Some(joined) = set.join_next().await {
        joined.expect("task panicked").expect("increment eventually commits");
    }

    let value = backend.get(b"container/c1/ver").await.expect("get").expect("present");
    assert_eq!(value, Bytes::from(WRITERS.to_string()));
    assert!(attempts.load(Ordering::Relaxed) >= WRITERS);
}
