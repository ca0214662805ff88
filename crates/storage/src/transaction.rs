//! Transaction trait for atomic storage operations.
//!
//! Transactions buffer sets, deletes and compare-and-set preconditions until
//! [`commit`](Transaction::commit). Commit applies everything or nothing: if
//! any precondition fails the whole transaction is rejected with
//! [`StorageError::Conflict`](crate::StorageError::Conflict).
//!
//! # Example
//!
//! ```
//! use appstore_storage::{MemoryBackend, StorageBackend};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend = MemoryBackend::new();
//!
//! let mut txn = backend.transaction().await.unwrap();
//! txn.compare_and_set(b"app/1/info.json".to_vec(), None, b"{}".to_vec()).unwrap();
//! txn.set(b"user/u1/own/app/1".to_vec(), b"{}".to_vec());
//! txn.commit().await.unwrap();
//!
//! assert!(backend.get(b"user/u1/own/app/1").await.unwrap().is_some());
//! # });
//! ```

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageResult;

/// Transaction handle for atomic multi-operation commits.
///
/// [`get`](Transaction::get) has read-your-writes semantics over the pending
/// buffer and otherwise reads the committed state.
#[async_trait]
pub trait Transaction: Send {
    /// Gets a value within the transaction.
    ///
    /// Pending writes and deletes in this transaction take precedence over
    /// the underlying storage.
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Buffers a set operation.
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>);

    /// Buffers a delete operation.
    fn delete(&mut self, key: Vec<u8>);

    /// Buffers a compare-and-set operation, verified at commit time.
    ///
    /// `expected: None` requires the key to be absent when the transaction
    /// commits.
    fn compare_and_set(
        &mut self,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
    ) -> StorageResult<()>;

    /// Buffers a precondition without a write.
    ///
    /// Commit fails with [`StorageError::Conflict`](crate::StorageError::Conflict)
    /// unless the key still holds `expected` (`None` meaning absent).
    fn check(&mut self, key: Vec<u8>, expected: Option<Vec<u8>>);

    /// Commits all buffered operations atomically.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Conflict`](crate::StorageError::Conflict) if any buffered
    ///   compare-and-set or [`check`](Transaction::check) precondition does not hold
    /// - Other [`StorageError`](crate::StorageError) variants on backend failures
    async fn commit(self: Box<Self>) -> StorageResult<()>;
}
