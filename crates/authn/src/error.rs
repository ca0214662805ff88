//! Authentication error types.
//!
//! This module defines errors raised by the session gate, the identity and
//! mail collaborators, and request signature verification.

use appstore_storage::StorageError;
use thiserror::Error;

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Authentication and identity errors.
///
/// # Non-exhaustive
///
/// New variants may be added without a semver-breaking change. Downstream
/// match expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// A required field is missing or malformed.
    #[error("Invalid {field}: {reason}")]
    InvalidInput {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The email address is well formed but not accepted by the email policy.
    #[error("Email domain not supported: {0}")]
    EmailNotAllowed(String),

    /// No login code is pending for the email address.
    #[error("No login code pending for {0}")]
    CodeNotFound(String),

    /// The submitted login code does not match the pending one.
    #[error("Login code mismatch")]
    CodeMismatch,

    /// A login code was issued too recently for this email address.
    #[error("Too many requests, please try again later")]
    RateLimited,

    /// The session token is absent or has expired.
    #[error("Not logged in")]
    NotLoggedIn,

    /// The user directory has no such user.
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// The request signature does not verify, or the signed timestamp is stale.
    #[error("Signature error")]
    SignatureInvalid,

    /// The user directory failed.
    #[error("User directory error: {0}")]
    Directory(String),

    /// The mail collaborator failed to dispatch a message.
    #[error("Mail dispatch error: {0}")]
    Mail(String),

    /// The session cache failed.
    #[error("Session storage error: {0}")]
    Storage(
        /// The underlying storage error.
        #[from]
        StorageError,
    ),
}

impl AuthError {
    /// Creates an `InvalidInput` error.
    #[must_use]
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidInput { field, reason: reason.into() }
    }
}
