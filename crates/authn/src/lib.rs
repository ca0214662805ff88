//! # App Store Authentication
//!
//! Session and request authentication for the app store backend.
//!
//! This crate provides:
//! - **Session gate**: emailed login codes, session tokens, logout
//! - **Email policy**: format validation and a suffix allow-list
//! - **Identity and mail contracts**: [`UserDirectory`] and [`MailDispatcher`] with in-memory
//!   implementations
//! - **Request signing**: order-independent SHA-256 signatures over request fields
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use appstore_authn::{
//!     MemoryMailer, MemoryUserDirectory, SessionConfig, SessionGate,
//! };
//! use appstore_storage::MokaCache;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mailer = MemoryMailer::new();
//! let gate = SessionGate::new(
//!     Arc::new(MokaCache::new(1_000)),
//!     Arc::new(MemoryUserDirectory::new()),
//!     Arc::new(mailer.clone()),
//!     SessionConfig::default(),
//! )?;
//!
//! gate.issue_login_code("dev@example.com").await?;
//! let code = mailer.last_to("dev@example.com").map(|m| m.body).unwrap_or_default();
//!
//! let token = gate.login("dev@example.com", &code).await?;
//! let uid = gate.resolve_uid(&token).await?;
//! assert!(!uid.is_empty());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Session gate configuration.
pub mod config;
/// User identity lookup.
pub mod directory;
/// Authentication error types.
pub mod error;
/// Outbound mail.
pub mod mail;
/// Login codes and session tokens.
pub mod session;
/// Request signatures.
pub mod signature;
/// Email validation.
pub mod validation;

pub use config::{EmailPolicy, SessionConfig};
pub use directory::{MemoryUserDirectory, User, UserDirectory};
pub use error::{AuthError, Result};
pub use mail::{Mail, MailDispatcher, MemoryMailer};
pub use session::SessionGate;
pub use signature::{sign, unix_now, verify_signature};
pub use validation::EmailValidator;
