//! In-memory storage backend implementation.
//!
//! [`MemoryBackend`] implements both collaborator contracts the app store
//! consumes: the document store ([`StorageBackend`]) and the key-value cache
//! ([`KeyValueCache`](crate::KeyValueCache)). It backs tests and single-node
//! development deployments.
//!
//! # Features
//!
//! - **Thread-safe**: [`parking_lot::RwLock`] around an ordered [`BTreeMap`]
//! - **TTL support**: expired keys read as absent immediately; a background task reclaims them
//! - **Compare-and-set**: exactly one winner among concurrent writers on a key
//! - **Transactions**: buffered writes with commit-time preconditions
//!
//! # Example
//!
//! ```
//! use appstore_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = MemoryBackend::new();
//!
//!     backend.set(b"container/c1/meta.json".to_vec(), b"{}".to_vec()).await.unwrap();
//!     let value = backend.get(b"container/c1/meta.json").await.unwrap();
//!
//!     assert_eq!(value.unwrap().as_ref(), b"{}");
//! }
//! ```

use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::{select, sync::watch, time::sleep};

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    transaction::Transaction,
    types::KeyValue,
};

/// Interval between background sweeps of expired keys.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

/// Holds the shutdown signal sender. When dropped, the watch channel
/// closes and the cleanup task exits.
struct ShutdownGuard {
    shutdown_tx: watch::Sender<()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// In-memory storage backend using [`BTreeMap`].
///
/// `MemoryBackend` is cheaply cloneable; all clones share the same data.
/// The background cleanup task stops when the last clone is dropped.
#[derive(Clone)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Bytes>>>,
    ttl_data: Arc<RwLock<BTreeMap<Vec<u8>, Instant>>>,
    shutdown_guard: Arc<ShutdownGuard>,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("keys", &self.data.read().len())
            .field("expiring_keys", &self.ttl_data.read().len())
            .finish()
    }
}

impl MemoryBackend {
    /// Creates a new in-memory storage backend.
    ///
    /// When called inside a Tokio runtime this also spawns the task that
    /// reclaims expired keys. Outside a runtime, expired keys are still
    /// hidden from reads and are reclaimed when overwritten or deleted.
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let backend = Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
            ttl_data: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_guard: Arc::new(ShutdownGuard { shutdown_tx }),
        };

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let data = Arc::clone(&backend.data);
            let ttl_data = Arc::clone(&backend.ttl_data);
            handle.spawn(cleanup_expired_keys(data, ttl_data, shutdown_rx));
        }

        backend
    }

    /// Explicitly signals the background cleanup task to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_guard.shutdown_tx.send(());
    }

    /// Returns the number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let data = self.data.read();
        data.keys().filter(|key| !self.is_expired(key)).count()
    }

    /// Returns `true` if no live keys are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, key: &[u8]) -> bool {
        let ttl_guard = self.ttl_data.read();
        ttl_guard.get(key).is_some_and(|expiry| *expiry <= Instant::now())
    }

    /// Shared body of the two compare-and-set entry points.
    fn cas_locked(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> StorageResult<()> {
        let mut data = self.data.write();

        let current = if self.is_expired(key) { None } else { data.get(key).cloned() };

        let matches = match (expected, &current) {
            (None, None) => true,
            (Some(exp), Some(cur)) => exp == &cur[..],
            _ => false,
        };

        if !matches {
            return Err(StorageError::Conflict);
        }

        data.insert(key.to_vec(), Bytes::from(new_value));

        let mut ttl_guard = self.ttl_data.write();
        match ttl {
            Some(ttl) => {
                ttl_guard.insert(key.to_vec(), Instant::now() + ttl);
            },
            None => {
                ttl_guard.remove(key);
            },
        }

        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Background task that removes expired keys once per [`CLEANUP_INTERVAL`].
async fn cleanup_expired_keys(
    data: Arc<RwLock<BTreeMap<Vec<u8>, Bytes>>>,
    ttl_data: Arc<RwLock<BTreeMap<Vec<u8>, Instant>>>,
    mut shutdown_rx: watch::Receiver<()>,
) {
    loop {
        select! {
            _ = sleep(CLEANUP_INTERVAL) => {}
            _ = shutdown_rx.changed() => {
                return;
            }
        }

        let now = Instant::now();
        let expired_keys: Vec<Vec<u8>> = {
            let ttl_guard = ttl_data.read();
            ttl_guard.iter().filter(|(_, expiry)| **expiry <= now).map(|(k, _)| k.clone()).collect()
        };

        if !expired_keys.is_empty() {
            // Lock order: data, then ttl_data.
            let mut data_guard = data.write();
            let mut ttl_guard = ttl_data.write();
            for key in expired_keys {
                if ttl_guard.get(&key).is_some_and(|expiry| *expiry <= now) {
                    data_guard.remove(&key);
                    ttl_guard.remove(&key);
                }
            }
            tracing::trace!("reclaimed expired keys");
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    #[tracing::instrument(skip_all, fields(key_len = key.len()))]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        if self.is_expired(key) {
            return Ok(None);
        }

        let data = self.data.read();
        Ok(data.get(key).cloned())
    }

    #[tracing::instrument(skip_all, fields(key_len = key.len(), value_len = value.len()))]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        let mut data = self.data.write();
        let mut ttl_guard = self.ttl_data.write();
        ttl_guard.remove(&key);
        data.insert(key, Bytes::from(value));
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(key_len = key.len(), ttl_ms = ttl.as_millis() as u64))]
    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()> {
        let mut data = self.data.write();
        let mut ttl_data = self.ttl_data.write();

        ttl_data.insert(key.clone(), Instant::now() + ttl);
        data.insert(key, Bytes::from(value));

        Ok(())
    }

    #[tracing::instrument(skip_all, fields(key_len = key.len()))]
    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        self.cas_locked(key, expected, new_value, None)
    }

    #[tracing::instrument(skip_all, fields(key_len = key.len(), ttl_ms = ttl.as_millis() as u64))]
    async fn compare_and_set_with_ttl(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
        ttl: Duration,
    ) -> StorageResult<()> {
        self.cas_locked(key, expected, new_value, Some(ttl))
    }

    #[tracing::instrument(skip_all, fields(key_len = key.len()))]
    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        let mut data = self.data.write();
        let mut ttl_guard = self.ttl_data.write();
        data.remove(key);
        ttl_guard.remove(key);
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(prefix_len = prefix.len()))]
    async fn get_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<KeyValue>> {
        let data = self.data.read();

        let results = data
            .range::<[u8], _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| !self.is_expired(key))
            .map(|(k, v)| KeyValue::new(Bytes::copy_from_slice(k), v.clone()))
            .collect();

        Ok(results)
    }

    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction::new(self.clone())))
    }

    async fn health_check(&self) -> StorageResult<()> {
        // Acquiring the read lock proves the backend is not deadlocked.
        let _unused = self.data.read();
        Ok(())
    }
}

/// A compare-and-set operation to be verified at commit time.
#[derive(Debug, Clone)]
struct CasOperation {
    key: Vec<u8>,
    expected: Option<Vec<u8>>,
    /// `None` for a bare precondition.
    new_value: Option<Vec<u8>>,
}

/// In-memory transaction implementation.
struct MemoryTransaction {
    backend: MemoryBackend,
    pending_writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    pending_cas: Vec<CasOperation>,
}

impl MemoryTransaction {
    fn new(backend: MemoryBackend) -> Self {
        Self { backend, pending_writes: BTreeMap::new(), pending_cas: Vec::new() }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        if let Some(value) = self.pending_writes.get(key) {
            return Ok(value.as_ref().map(|v| Bytes::copy_from_slice(v)));
        }
        if let Some(new_value) = self
            .pending_cas
            .iter()
            .rev()
            .find(|cas| cas.key == key && cas.new_value.is_some())
            .and_then(|cas| cas.new_value.as_deref())
        {
            return Ok(Some(Bytes::copy_from_slice(new_value)));
        }

        self.backend.get(key).await
    }

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.pending_writes.insert(key, Some(value));
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.pending_writes.insert(key, None);
    }

    fn compare_and_set(
        &mut self,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        self.pending_cas.push(CasOperation { key, expected, new_value: Some(new_value) });
        Ok(())
    }

    fn check(&mut self, key: Vec<u8>, expected: Option<Vec<u8>>) {
        self.pending_cas.push(CasOperation { key, expected, new_value: None });
    }

    #[tracing::instrument(skip_all)]
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let mut data = self.backend.data.write();

        for cas in &self.pending_cas {
            let current_value =
                if self.backend.is_expired(&cas.key) { None } else { data.get(&cas.key).cloned() };

            let matches = match (&cas.expected, &current_value) {
                (None, None) => true,
                (Some(expected_bytes), Some(current_bytes)) => {
                    expected_bytes.as_slice() == &current_bytes[..]
                },
                _ => false,
            };

            if !matches {
                return Err(StorageError::Conflict);
            }
        }

        let mut ttl_guard = self.backend.ttl_data.write();

        for cas in self.pending_cas {
            if let Some(new_value) = cas.new_value {
                ttl_guard.remove(&cas.key);
                data.insert(cas.key, Bytes::from(new_value));
            }
        }

        for (key, value) in self.pending_writes {
            ttl_guard.remove(&key);
            match value {
                Some(v) => {
                    data.insert(key, Bytes::from(v));
                },
                None => {
                    data.remove(&key);
                },
            }
        }

        Ok(())
    }
}
