//! # App Store Core
//!
//! Access control, cache-aside metadata and the artifact lifecycle of the
//! app store backend.
//!
//! This crate provides:
//! - **[`AppStore`]**: every public operation, each under a request deadline
//! - **Metadata**: [`MetadataStore`] with cache-aside reads, invalidate-after-write and an
//!   optimistic [`atomic_transform`](MetadataStore::atomic_transform)
//! - **Access control**: [`CapabilityResolver`] with a token-based variant for apps and a
//!   role-based variant for containers
//! - **Artifacts**: upload tickets, version publication and signed delivery to approved
//!   containers through an [`ObjectStorage`] collaborator
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use appstore_authn::{MemoryMailer, MemoryUserDirectory};
//! use appstore_core::{
//!     AppStore, AppStoreConfig, Capability, CapabilityResolver, Collaborators, PresignedUrlSigner,
//! };
//! use appstore_storage::MemoryBackend;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = MemoryBackend::new();
//! let mailer = MemoryMailer::new();
//! let store = AppStore::new(
//!     Collaborators::builder()
//!         .store(Arc::new(backend.clone()))
//!         .cache(Arc::new(backend))
//!         .directory(Arc::new(MemoryUserDirectory::new()))
//!         .mailer(Arc::new(mailer.clone()))
//!         .objects(Arc::new(PresignedUrlSigner::new("https://objects.example.com", b"key".to_vec())?))
//!         .build(),
//!     AppStoreConfig::default(),
//! )?;
//!
//! store.issue_login_code("dev@example.com").await?;
//! let code = mailer.last_to("dev@example.com").map(|m| m.body).unwrap_or_default();
//! let token = store.login("dev@example.com", &code).await?;
//!
//! let app = store.create_app(&token, "Notes", None).await?;
//! let uid = store.resolve_uid(&token).await?;
//! let granted = store.app_resolver().resolve(&uid, &app.id, &[Capability::Own]).await?;
//! assert_eq!(granted, [Capability::Own]);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Capability resolution.
pub mod access;
mod apps;
/// Configuration.
pub mod config;
mod containers;
/// Error types.
pub mod error;
/// Metadata paths and object keys.
pub mod keys;
/// Cache-aside metadata store.
pub mod metadata;
/// Entities and request types.
pub mod model;
/// Object storage collaborator.
pub mod object_store;
/// The service facade.
pub mod service;
/// Input validators.
pub mod validate;

pub use access::{Capability, CapabilityResolver, RoleBasedResolver, TokenBasedResolver, require};
pub use config::{AppStoreConfig, CasRetrySettings, ConfigError};
pub use error::{AppStoreError, ErrorKind, Result};
pub use metadata::{Changes, MetadataStore, Snapshot};
pub use model::{
    App, AppVersion, Approval, Container, ContainerInfo, ContainerInfoRequest, FetchGrant, Member,
    MemberView, Ownership, Page, PageInfo, Paged, ResourceKind, Role, SignedFetchRequest,
    UploadTicket, VersionStatus,
};
pub use object_store::{ObjectStorage, PresignedUrlSigner};
pub use service::{AppStore, Collaborators};
pub use validate::Validators;
