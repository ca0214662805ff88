//! App store error taxonomy.
//!
//! Every public operation returns exactly one typed success payload or one
//! [`AppStoreError`]. Each error carries a stable numeric [`code`](AppStoreError::code)
//! and a coarse [`ErrorKind`]; only [`ErrorKind::Unavailable`] is worth
//! retrying.
//!
//! | Kind | Code |
//! |------|------|
//! | `InvalidInput` | 400 |
//! | `NotFound` | 404 |
//! | `CodeMismatch` | 601 |
//! | `NotLoggedIn` | 602 |
//! | `PermissionDenied` | 603 |
//! | `SignatureInvalid` | 604 |
//! | `Conflict` | 605 |
//! | `VersionExists` | 606 |
//! | `RateLimited` | 607 |
//! | `Internal` | 500 |
//! | `Unavailable` | 503 |

use appstore_authn::AuthError;
use appstore_storage::StorageError;
use thiserror::Error;

/// Result type alias for app store operations.
pub type Result<T> = std::result::Result<T, AppStoreError>;

/// Coarse error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or missing input.
    InvalidInput,
    /// No valid session.
    NotLoggedIn,
    /// Insufficient capability.
    PermissionDenied,
    /// Resource, version or login code absent.
    NotFound,
    /// Uniqueness or ownership rule violated.
    Conflict,
    /// Login code did not match.
    CodeMismatch,
    /// Request signature rejected.
    SignatureInvalid,
    /// Too many requests.
    RateLimited,
    /// A collaborator timed out or failed in transport.
    Unavailable,
    /// Unexpected internal failure.
    Internal,
}

/// App store errors.
///
/// # Non-exhaustive
///
/// New variants may be added without a semver-breaking change. Downstream
/// match expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppStoreError {
    /// A required field is missing or malformed.
    #[error("Invalid {field}: {reason}")]
    InvalidInput {
        /// Name of the offending field.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The caller has no valid session.
    #[error("Not logged in")]
    NotLoggedIn,

    /// The caller lacks a required capability.
    #[error("No permission")]
    PermissionDenied,

    /// The requested entity does not exist.
    #[error("Not found: {what}")]
    NotFound {
        /// Description of the missing entity.
        what: String,
    },

    /// The version has already been published.
    #[error("The app version already exists: {appid}@{ver}")]
    VersionExists {
        /// App id.
        appid: String,
        /// Version string.
        ver: String,
    },

    /// A uniqueness or ownership rule was violated, or an atomic update
    /// kept losing races.
    #[error("Conflict: {message}")]
    Conflict {
        /// What conflicted.
        message: String,
    },

    /// The submitted login code does not match.
    #[error("Login code mismatch")]
    CodeMismatch,

    /// The request signature or its timestamp is invalid.
    #[error("Signature error")]
    SignatureInvalid,

    /// A rate limit was hit.
    #[error("Too many requests, please try again later")]
    RateLimited,

    /// A collaborator timed out or was unreachable.
    #[error("Service unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Unexpected internal failure.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl AppStoreError {
    /// Creates an `InvalidInput` error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput { field: field.into(), reason: reason.into() }
    }

    /// Creates a `NotFound` error.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Creates a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict { message: message.into() }
    }

    /// Creates an `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable { message: message.into(), source: None }
    }

    /// Creates an `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates an `Internal` error with a source.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Returns the coarse classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::NotLoggedIn => ErrorKind::NotLoggedIn,
            Self::PermissionDenied => ErrorKind::PermissionDenied,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::VersionExists { .. } | Self::Conflict { .. } => ErrorKind::Conflict,
            Self::CodeMismatch => ErrorKind::CodeMismatch,
            Self::SignatureInvalid => ErrorKind::SignatureInvalid,
            Self::RateLimited => ErrorKind::RateLimited,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns the stable numeric error code.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::InvalidInput { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::CodeMismatch => 601,
            Self::NotLoggedIn => 602,
            Self::PermissionDenied => 603,
            Self::SignatureInvalid => 604,
            Self::Conflict { .. } => 605,
            Self::VersionExists { .. } => 606,
            Self::RateLimited => 607,
            Self::Internal { .. } => 500,
            Self::Unavailable { .. } => 503,
        }
    }

    /// Returns `true` if the caller may retry the same request.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Unavailable
    }
}

impl From<StorageError> for AppStoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { key } => Self::not_found(key),
            StorageError::Conflict | StorageError::CasRetriesExhausted { .. } => {
                Self::conflict(err.to_string())
            },
            StorageError::Connection { .. } | StorageError::Timeout => Self::Unavailable {
                message: "storage collaborator failed".to_owned(),
                source: Some(Box::new(err)),
            },
            other => Self::Internal {
                message: "storage error".to_owned(),
                source: Some(Box::new(other)),
            },
        }
    }
}

impl From<AuthError> for AppStoreError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidInput { field, reason } => Self::invalid(field, reason),
            AuthError::EmailNotAllowed(email) => {
                Self::invalid("email", format!("domain not supported: {email}"))
            },
            AuthError::CodeNotFound(email) => Self::not_found(format!("login code for {email}")),
            AuthError::CodeMismatch => Self::CodeMismatch,
            AuthError::RateLimited => Self::RateLimited,
            AuthError::NotLoggedIn => Self::NotLoggedIn,
            AuthError::UserNotFound(who) => Self::not_found(format!("user {who}")),
            AuthError::SignatureInvalid => Self::SignatureInvalid,
            AuthError::Storage(storage) => storage.into(),
            AuthError::Directory(message) | AuthError::Mail(message) => {
                Self::Unavailable { message, source: None }
            },
            other => Self::Internal { message: other.to_string(), source: None },
        }
    }
}

impl From<serde_json::Error> for AppStoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal_with_source("metadata encoding failed", err)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::invalid(AppStoreError::invalid("ver", "bad"), 400, ErrorKind::InvalidInput)]
    #[case::not_found(AppStoreError::not_found("app a1"), 404, ErrorKind::NotFound)]
    #[case::code_mismatch(AppStoreError::CodeMismatch, 601, ErrorKind::CodeMismatch)]
    #[case::not_logged_in(AppStoreError::NotLoggedIn, 602, ErrorKind::NotLoggedIn)]
    #[case::permission(AppStoreError::PermissionDenied, 603, ErrorKind::PermissionDenied)]
    #[case::signature(AppStoreError::SignatureInvalid, 604, ErrorKind::SignatureInvalid)]
    #[case::conflict(AppStoreError::conflict("owner"), 605, ErrorKind::Conflict)]
    #[case::version_exists(
        AppStoreError::VersionExists { appid: "a".into(), ver: "1.0".into() },
        606,
        ErrorKind::Conflict
    )]
    #[case::rate_limited(AppStoreError::RateLimited, 607, ErrorKind::RateLimited)]
    #[case::unavailable(AppStoreError::unavailable("timeout"), 503, ErrorKind::Unavailable)]
    #[case::internal(AppStoreError::internal("boom"), 500, ErrorKind::Internal)]
    fn codes_and_kinds(#[case] err: AppStoreError, #[case] code: u16, #[case] kind: ErrorKind) {
        assert_eq!(err.code(), code);
        assert_eq!(err.kind(), kind);
        assert_eq!(err.is_retryable(), kind == ErrorKind::Unavailable);
    }

    #[rstest]
    #[case::timeout(StorageError::timeout(), ErrorKind::Unavailable)]
    #[case::connection(StorageError::connection("refused"), ErrorKind::Unavailable)]
    #[case::conflict(StorageError::conflict(), ErrorKind::Conflict)]
    #[case::exhausted(StorageError::cas_retries_exhausted(6), ErrorKind::Conflict)]
    #[case::not_found(StorageError::not_found("k"), ErrorKind::NotFound)]
    #[case::serialization(StorageError::serialization("bad"), ErrorKind::Internal)]
    fn storage_errors_map_to_kinds(#[case] err: StorageError, #[case] kind: ErrorKind) {
        assert_eq!(AppStoreError::from(err).kind(), kind);
    }

    #[rstest]
    #[case::rate_limited(AuthError::RateLimited, ErrorKind::RateLimited)]
    #[case::mismatch(AuthError::CodeMismatch, ErrorKind::CodeMismatch)]
    #[case::missing_code(AuthError::CodeNotFound("a@x.com".into()), ErrorKind::NotFound)]
    #[case::not_logged_in(AuthError::NotLoggedIn, ErrorKind::NotLoggedIn)]
    #[case::bad_email(AuthError::EmailNotAllowed("a@z.com".into()), ErrorKind::InvalidInput)]
    #[case::mail(AuthError::Mail("smtp".into()), ErrorKind::Unavailable)]
    #[case::storage_timeout(AuthError::Storage(StorageError::timeout()), ErrorKind::Unavailable)]
    fn auth_errors_map_to_kinds(#[case] err: AuthError, #[case] kind: ErrorKind) {
        assert_eq!(AppStoreError::from(err).kind(), kind);
    }
}
