//! Storage and cache abstractions for the app store backend.
//!
//! This crate provides the byte-level collaborator contracts the metadata
//! layer is written against, plus in-process implementations of each.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   appstore-core / authn                     │
//! │   MetadataStore (cache-aside)  │  SessionGate (TTL keys)    │
//! ├───────────────────────────────┬─────────────────────────────┤
//! │        StorageBackend         │        KeyValueCache        │
//! │ (get, set, compare_and_set,   │ (get, set, set_if_absent,   │
//! │  get_prefix, transaction)     │  delete)                    │
//! ├───────────────────────────────┼──────────────┬──────────────┤
//! │         MemoryBackend         │ MemoryBackend│  MokaCache   │
//! └───────────────────────────────┴──────────────┴──────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use appstore_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MemoryBackend::new();
//!
//!     backend.set(b"app/1/info.json".to_vec(), br#"{"id":"1"}"#.to_vec()).await?;
//!
//!     // Atomic multi-key write with a uniqueness precondition
//!     let mut txn = backend.transaction().await?;
//!     txn.compare_and_set(b"app/1/ver/1.0.0".to_vec(), None, b"{}".to_vec())?;
//!     txn.set(b"app/1/member/u1".to_vec(), b"{}".to_vec());
//!     txn.commit().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! All operations return [`StorageResult<T>`]. Absence is `Ok(None)`, never
//! an error; [`StorageError::Conflict`] signals a failed compare-and-set
//! precondition; [`StorageError::is_transient`] identifies infrastructure
//! failures.

#![deny(unsafe_code)]

pub mod backend;
pub mod cache;
pub mod error;
pub mod memory;
pub mod retry;
pub mod transaction;
pub mod types;

pub use backend::StorageBackend;
pub use cache::{DEFAULT_MAX_ENTRIES, KeyValueCache, MokaCache};
pub use error::{BoxError, StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use retry::{CasOutcome, CasRetryConfig, with_cas_retry};
pub use transaction::Transaction;
pub use types::KeyValue;
