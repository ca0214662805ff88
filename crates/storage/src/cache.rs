//! Key-value cache collaborator.
//!
//! [`KeyValueCache`] is the narrow contract the session gate and the
//! metadata store consume: string keys, opaque byte values, a per-entry TTL,
//! an insert-if-absent primitive for cooldown markers and a
//! compare-and-delete primitive for one-time codes. A miss is
//! `Ok(None)` and is always distinguishable from an infrastructure error.
//!
//! Two implementations are provided:
//!
//! - [`MemoryBackend`] maps the contract onto its TTL and compare-and-set support, so one
//!   in-memory instance can play both the cache and the store in tests.
//! - [`MokaCache`] is a bounded in-process cache built on [`moka`] with per-entry expiry.
//!
//! # Usage
//!
//! ```no_run
//! # use std::time::Duration;
//! # use appstore_storage::{KeyValueCache, MokaCache};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = MokaCache::new(10_000);
//!
//! cache.set("token/abc", b"u1".to_vec(), Duration::from_secs(60)).await?;
//! assert_eq!(cache.get("token/abc").await?.as_deref(), Some(&b"u1"[..]));
//!
//! assert!(cache.set_if_absent("cooldown/a@x.com", b"1".to_vec(), Duration::from_secs(60)).await?);
//! assert!(!cache.set_if_absent("cooldown/a@x.com", b"1".to_vec(), Duration::from_secs(60)).await?);
//! # Ok(())
//! # }
//! ```

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use moka::{
    Expiry,
    future::Cache,
    ops::compute::{CompResult, Op},
};
use tracing::trace;

use crate::{
    StorageBackend,
    error::{StorageError, StorageResult},
    memory::MemoryBackend,
};

/// Default maximum number of entries held by a [`MokaCache`].
pub const DEFAULT_MAX_ENTRIES: u64 = 100_000;

/// Key-value cache with per-entry expiry.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// Returns the cached value, or `Ok(None)` on a miss or expired entry.
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>>;

    /// Stores `value` under `key` for `ttl`, replacing any existing entry.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StorageResult<()>;

    /// Stores `value` only if no live entry exists.
    ///
    /// Returns `true` if this call inserted the entry and `false` if another
    /// live entry was already present. Concurrent callers on the same key
    /// observe exactly one `true`.
    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StorageResult<bool>;

    /// Removes `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Removes `key` only if it currently holds exactly `expected`.
    ///
    /// Returns `true` if this call removed the entry. Concurrent callers
    /// consuming the same entry observe exactly one `true`.
    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> StorageResult<bool>;
}

#[async_trait]
impl KeyValueCache for MemoryBackend {
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        StorageBackend::get(self, key.as_bytes()).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StorageResult<()> {
        self.set_with_ttl(key.as_bytes().to_vec(), value, ttl).await
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StorageResult<bool> {
        match self.compare_and_set_with_ttl(key.as_bytes(), None, value, ttl).await {
            Ok(()) => Ok(true),
            Err(StorageError::Conflict) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        StorageBackend::delete(self, key.as_bytes()).await
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> StorageResult<bool> {
        let mut txn = StorageBackend::transaction(self).await?;
        txn.check(key.as_bytes().to_vec(), Some(expected.to_vec()));
        txn.delete(key.as_bytes().to_vec());
        match txn.commit().await {
            Ok(()) => Ok(true),
            Err(StorageError::Conflict) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// A cached value together with the TTL it was written with.
#[derive(Clone)]
struct CacheEntry {
    value: Bytes,
    ttl: Duration,
}

/// Expiry policy reading the TTL carried by each entry.
struct PerEntryTtl;

impl Expiry<String, CacheEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Bounded in-process [`KeyValueCache`] backed by [`moka`].
///
/// Cloning is cheap; clones share the same entries.
#[derive(Clone)]
pub struct MokaCache {
    inner: Cache<String, CacheEntry>,
    max_entries: u64,
}

impl std::fmt::Debug for MokaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaCache")
            .field("entries", &self.inner.entry_count())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

impl MokaCache {
    /// Creates a cache holding at most `max_entries` entries.
    pub fn new(max_entries: u64) -> Self {
        let inner = Cache::builder().max_capacity(max_entries).expire_after(PerEntryTtl).build();
        Self { inner, max_entries }
    }
}

impl Default for MokaCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

#[async_trait]
impl KeyValueCache for MokaCache {
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        let hit = self.inner.get(key).await.map(|entry| entry.value);
        trace!(key, hit = hit.is_some(), "moka lookup");
        Ok(hit)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StorageResult<()> {
        self.inner.insert(key.to_owned(), CacheEntry { value: Bytes::from(value), ttl }).await;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StorageResult<bool> {
        let entry = self
            .inner
            .entry(key.to_owned())
            .or_insert(CacheEntry { value: Bytes::from(value), ttl })
            .await;
        Ok(entry.is_fresh())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.invalidate(key).await;
        Ok(())
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> StorageResult<bool> {
        let outcome = self
            .inner
            .entry_by_ref(key)
            .and_compute_with(|current| async move {
                match current {
                    Some(entry) if entry.value().value.as_ref() == expected => Op::Remove,
                    _ => Op::Nop,
                }
            })
            .await;
        Ok(matches!(outcome, CompResult::Removed(_)))
    }
}
