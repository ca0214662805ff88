//! Cache-aside metadata store.
//!
//! [`MetadataStore`] layers a [`KeyValueCache`] over a [`StorageBackend`]:
//!
//! - **Reads** check the cache first. A miss, a cache failure or an entry that no longer decodes
//!   falls through to the store, and a present value is written back with the configured TTL.
//! - **Writes** commit to the store and then delete the cache entry. An invalidation failure is
//!   logged and not reported; the entry expires within one TTL.
//! - **[`atomic_transform`](MetadataStore::atomic_transform)** reads a set of paths straight from
//!   the store, applies a pure function, and commits its changes under preconditions that every
//!   path read is unchanged. Lost races are retried with jitter; domain errors abort at once.
//!
//! Absent entries are never cached.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use appstore_storage::{
    CasOutcome, CasRetryConfig, KeyValueCache, StorageBackend, StorageError, with_cas_retry,
};
use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, trace, warn};

use crate::error::{AppStoreError, Result};

/// Values read by an atomic transform, keyed by path.
#[derive(Debug, Default)]
pub struct Snapshot {
    entries: BTreeMap<String, Option<Bytes>>,
}

impl Snapshot {
    /// Raw value at `path`, or `None` if absent or not part of the read set.
    pub fn get(&self, path: &str) -> Option<&Bytes> {
        self.entries.get(path).and_then(Option::as_ref)
    }

    /// Returns `true` if `path` exists.
    pub fn exists(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Decodes the value at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::Internal`] if the stored document does not decode.
    pub fn get_object<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        self.get(path).map(|bytes| decode(path, bytes)).transpose()
    }
}

/// Writes produced by an atomic transform.
#[derive(Debug, Default)]
pub struct Changes {
    writes: BTreeMap<String, Option<Vec<u8>>>,
}

impl Changes {
    /// Writes `value` at `path`.
    pub fn put(&mut self, path: impl Into<String>, value: Vec<u8>) {
        self.writes.insert(path.into(), Some(value));
    }

    /// Writes `value` encoded as JSON at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::Internal`] if `value` does not encode.
    pub fn put_object<T: Serialize>(&mut self, path: impl Into<String>, value: &T) -> Result<()> {
        self.put(path, serde_json::to_vec(value)?);
        Ok(())
    }

    /// Deletes `path`.
    pub fn delete(&mut self, path: impl Into<String>) {
        self.writes.insert(path.into(), None);
    }
}

/// Failure of one transform attempt.
enum AttemptError {
    /// Another writer changed a path that was read.
    Raced,
    /// Anything else; never retried.
    Failed(AppStoreError),
}

impl CasOutcome for AttemptError {
    fn is_conflict(&self) -> bool {
        matches!(self, AttemptError::Raced)
    }

    fn exhausted(attempts: u32) -> Self {
        AttemptError::Failed(AppStoreError::conflict(format!(
            "concurrent update, gave up after {attempts} attempts"
        )))
    }
}

impl From<StorageError> for AttemptError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict => AttemptError::Raced,
            other => AttemptError::Failed(other.into()),
        }
    }
}

/// Cache-aside metadata store.
#[derive(Clone)]
pub struct MetadataStore {
    store: Arc<dyn StorageBackend>,
    cache: Arc<dyn KeyValueCache>,
    prefix: String,
    cache_ttl: Duration,
    retry: CasRetryConfig,
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("prefix", &self.prefix)
            .field("cache_ttl", &self.cache_ttl)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl MetadataStore {
    /// Creates a store over `store` and `cache`.
    pub fn new(
        store: Arc<dyn StorageBackend>,
        cache: Arc<dyn KeyValueCache>,
        prefix: impl Into<String>,
        cache_ttl: Duration,
        retry: CasRetryConfig,
    ) -> Self {
        Self { store, cache, prefix: prefix.into(), cache_ttl, retry }
    }

    fn cache_key(&self, path: &str) -> String {
        format!("{}meta/{path}", self.prefix)
    }

    async fn cached(&self, key: &str) -> Option<Bytes> {
        match self.cache.get(key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, falling back to store");
                None
            },
        }
    }

    async fn populate(&self, key: &str, value: &Bytes) {
        if let Err(e) = self.cache.set(key, value.to_vec(), self.cache_ttl).await {
            warn!(key, error = %e, "Cache populate failed");
        }
    }

    async fn invalidate(&self, path: &str) {
        let key = self.cache_key(path);
        if let Err(e) = self.cache.delete(&key).await {
            warn!(key, error = %e, "Cache invalidation failed, entry will expire");
        }
    }

    /// Reads `path` through the cache.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails; cache failures are misses.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, path: &str) -> Result<Option<Bytes>> {
        let key = self.cache_key(path);
        if let Some(hit) = self.cached(&key).await {
            trace!("cache hit");
            return Ok(Some(hit));
        }

        let value = self.store.get(path.as_bytes()).await?;
        if let Some(value) = &value {
            self.populate(&key, value).await;
            trace!("cache miss, populated");
        }
        Ok(value)
    }

    /// Reads and decodes `path` through the cache.
    ///
    /// A cached entry that fails to decode is treated as a miss.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the stored document does not
    /// decode.
    #[tracing::instrument(skip(self))]
    pub async fn get_object<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let key = self.cache_key(path);
        if let Some(hit) = self.cached(&key).await {
            match serde_json::from_slice(&hit) {
                Ok(value) => {
                    trace!("cache hit");
                    return Ok(Some(value));
                },
                Err(e) => debug!(error = %e, "Cached entry does not decode, reading store"),
            }
        }

        let Some(bytes) = self.store.get(path.as_bytes()).await? else {
            return Ok(None);
        };
        let value = decode(path, &bytes)?;
        self.populate(&key, &bytes).await;
        trace!("cache miss, populated");
        Ok(Some(value))
    }

    /// Reads and decodes `path` directly from the store, bypassing the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the document does not decode.
    #[tracing::instrument(skip(self))]
    pub async fn get_object_fresh<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        self.store.get(path.as_bytes()).await?.map(|bytes| decode(path, &bytes)).transpose()
    }

    /// Returns `true` if `path` exists, reading through the cache.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.get(path).await?.is_some())
    }

    /// Writes `value` at `path` and invalidates the cache entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails; nothing is invalidated then.
    #[tracing::instrument(skip(self, value), fields(value_len = value.len()))]
    pub async fn put(&self, path: &str, value: Vec<u8>) -> Result<()> {
        self.store.set(path.as_bytes().to_vec(), value).await?;
        self.invalidate(path).await;
        Ok(())
    }

    /// Writes `value` encoded as JSON at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the store write fails.
    pub async fn put_object<T: Serialize + Sync>(&self, path: &str, value: &T) -> Result<()> {
        self.put(path, serde_json::to_vec(value)?).await
    }

    /// Deletes `path` and invalidates the cache entry. Deleting an absent
    /// path is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the store delete fails.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, path: &str) -> Result<()> {
        self.store.delete(path.as_bytes()).await?;
        self.invalidate(path).await;
        Ok(())
    }

    /// Lists and decodes every document under `prefix`, in path order,
    /// straight from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or a document does not decode.
    #[tracing::instrument(skip(self))]
    pub async fn list<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<(String, T)>> {
        let entries = self.store.get_prefix(prefix.as_bytes()).await?;
        entries
            .into_iter()
            .map(|kv| {
                let path = String::from_utf8_lossy(&kv.key).into_owned();
                let value = decode(&path, &kv.value)?;
                Ok((path, value))
            })
            .collect()
    }

    /// Atomically reads `paths`, applies `apply`, and commits its changes.
    ///
    /// `apply` sees a [`Snapshot`] of `paths` read from the store (not the
    /// cache) and records writes into [`Changes`]. The commit succeeds only if
    /// none of `paths` changed since they were read; otherwise the cycle is
    /// repeated. `apply` may run more than once and must be free of side
    /// effects.
    ///
    /// Writes to paths outside the read set carry no precondition.
    ///
    /// # Errors
    ///
    /// - Any error returned by `apply`, unchanged and without writing
    /// - [`AppStoreError::Conflict`] once retries are exhausted
    /// - Store errors mapped through [`AppStoreError::from`]
    #[tracing::instrument(skip(self, apply), fields(paths = paths.len()))]
    pub async fn atomic_transform<R, F>(&self, paths: &[String], apply: F) -> Result<R>
    where
        F: Fn(&Snapshot, &mut Changes) -> Result<R> + Send + Sync,
        R: Send,
    {
        let apply = &apply;
        let outcome =
            with_cas_retry(&self.retry, move || self.transform_once(paths, apply)).await;

        match outcome {
            Ok((result, written)) => {
                for path in &written {
                    self.invalidate(path).await;
                }
                debug!(written = written.len(), "Atomic transform committed");
                Ok(result)
            },
            Err(AttemptError::Failed(e)) => Err(e),
            Err(AttemptError::Raced) => Err(AppStoreError::conflict("concurrent update")),
        }
    }

    async fn transform_once<R, F>(
        &self,
        paths: &[String],
        apply: &F,
    ) -> std::result::Result<(R, Vec<String>), AttemptError>
    where
        F: Fn(&Snapshot, &mut Changes) -> Result<R> + Send + Sync,
        R: Send,
    {
        let mut txn = self.store.transaction().await?;

        let mut snapshot = Snapshot::default();
        for path in paths {
            let value = txn.get(path.as_bytes()).await?;
            snapshot.entries.insert(path.clone(), value);
        }

        let mut changes = Changes::default();
        let result = apply(&snapshot, &mut changes).map_err(AttemptError::Failed)?;

        for (path, value) in &snapshot.entries {
            txn.check(path.as_bytes().to_vec(), value.as_ref().map(|v| v.to_vec()));
        }
        let mut written = Vec::with_capacity(changes.writes.len());
        for (path, value) in changes.writes {
            match value {
                Some(value) => txn.set(path.as_bytes().to_vec(), value),
                None => txn.delete(path.as_bytes().to_vec()),
            }
            written.push(path);
        }

        txn.commit().await?;
        Ok((result, written))
    }
}

fn decode<T: DeserializeOwned>(path: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        warn!(path, error = %e, "Stored document does not decode");
        AppStoreError::internal_with_source(format!("corrupt document at {path}"), e)
    })
}
