//! App store configuration.
//!
//! [`AppStoreConfig`] is deserialized once at startup and validated by
//! [`AppStoreConfig::validate`] before any component is built. Durations are
//! written in humantime notation (`"5m"`, `"10s"`).
//!
//! ```
//! use appstore_core::AppStoreConfig;
//!
//! let config: AppStoreConfig = serde_json::from_str(
//!     r#"{ "prefix": "store:", "cache_ttl": "2m", "session": { "code_length": 6 } }"#,
//! )
//! .unwrap();
//! config.validate().unwrap();
//! assert_eq!(config.session.code_length, 6);
//! ```

use std::time::Duration;

use appstore_authn::{SessionConfig, config::MAX_CODE_LENGTH};
use appstore_storage::CasRetryConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default metadata cache entry lifetime.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default lifetime of upload URLs.
pub const DEFAULT_UPLOAD_URL_TTL: Duration = Duration::from_secs(600);

/// Default lifetime of download URLs.
pub const DEFAULT_DOWNLOAD_URL_TTL: Duration = Duration::from_secs(600);

/// Default accepted clock skew for signed requests.
pub const DEFAULT_SIGNATURE_MAX_AGE: Duration = Duration::from_secs(300);

/// Default budget for one public operation.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shortest accepted `request_timeout`.
pub const MIN_REQUEST_TIMEOUT: Duration = Duration::from_millis(10);

/// Shortest accepted TTL for cache entries and URLs.
pub const MIN_TTL: Duration = Duration::from_secs(1);

/// Upper bound on `cas_retry.max_retries`.
pub const MAX_CAS_RETRIES: u32 = 100;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A value is below its minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Field name.
        field: &'static str,
        /// Smallest accepted value.
        min: String,
        /// Supplied value.
        value: String,
    },

    /// A value is otherwise invalid.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Compare-and-set retry policy as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CasRetrySettings {
    /// Retries after the first attempt.
    #[serde(default = "default_cas_max_retries")]
    pub max_retries: u32,

    /// Base delay before each retry.
    #[serde(with = "humantime_serde", default = "default_cas_base_delay")]
    pub base_delay: Duration,
}

impl Default for CasRetrySettings {
    fn default() -> Self {
        let defaults = CasRetryConfig::default();
        Self { max_retries: defaults.max_retries, base_delay: defaults.base_delay }
    }
}

impl From<CasRetrySettings> for CasRetryConfig {
    fn from(settings: CasRetrySettings) -> Self {
        Self { max_retries: settings.max_retries, base_delay: settings.base_delay }
    }
}

fn default_cas_max_retries() -> u32 {
    CasRetryConfig::default().max_retries
}

fn default_cas_base_delay() -> Duration {
    CasRetryConfig::default().base_delay
}

/// Top-level app store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct AppStoreConfig {
    /// Prefix prepended to every metadata cache key.
    #[serde(default)]
    #[builder(default)]
    pub prefix: String,

    /// Login code and session settings.
    #[serde(default)]
    #[builder(default)]
    pub session: SessionConfig,

    /// Lifetime of metadata cache entries.
    #[serde(with = "humantime_serde", default = "default_cache_ttl")]
    #[builder(default = DEFAULT_CACHE_TTL)]
    pub cache_ttl: Duration,

    /// Lifetime of signed upload URLs.
    #[serde(with = "humantime_serde", default = "default_upload_url_ttl")]
    #[builder(default = DEFAULT_UPLOAD_URL_TTL)]
    pub upload_url_ttl: Duration,

    /// Lifetime of signed download URLs.
    #[serde(with = "humantime_serde", default = "default_download_url_ttl")]
    #[builder(default = DEFAULT_DOWNLOAD_URL_TTL)]
    pub download_url_ttl: Duration,

    /// Accepted distance between a signed timestamp and now.
    #[serde(with = "humantime_serde", default = "default_signature_max_age")]
    #[builder(default = DEFAULT_SIGNATURE_MAX_AGE)]
    pub signature_max_age: Duration,

    /// Budget for one public operation, collaborator calls included.
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    #[builder(default = DEFAULT_REQUEST_TIMEOUT)]
    pub request_timeout: Duration,

    /// Retry policy for atomic transforms.
    #[serde(default)]
    #[builder(default)]
    pub cas_retry: CasRetrySettings,
}

fn default_cache_ttl() -> Duration {
    DEFAULT_CACHE_TTL
}

fn default_upload_url_ttl() -> Duration {
    DEFAULT_UPLOAD_URL_TTL
}

fn default_download_url_ttl() -> Duration {
    DEFAULT_DOWNLOAD_URL_TTL
}

fn default_signature_max_age() -> Duration {
    DEFAULT_SIGNATURE_MAX_AGE
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

impl Default for AppStoreConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl AppStoreConfig {
    /// Checks every field against its bounds.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_min("cache_ttl", self.cache_ttl, MIN_TTL)?;
        check_min("upload_url_ttl", self.upload_url_ttl, MIN_TTL)?;
        check_min("download_url_ttl", self.download_url_ttl, MIN_TTL)?;
        check_min("signature_max_age", self.signature_max_age, MIN_TTL)?;
        check_min("request_timeout", self.request_timeout, MIN_REQUEST_TIMEOUT)?;

        if self.session.code_length == 0 || self.session.code_length > MAX_CODE_LENGTH {
            return Err(ConfigError::Invalid {
                field: "session.code_length",
                reason: format!("must be between 1 and {MAX_CODE_LENGTH}"),
            });
        }
        if self.session.code_ttl.is_zero() {
            return Err(ConfigError::Invalid {
                field: "session.code_ttl",
                reason: "must be non-zero".to_owned(),
            });
        }
        if self.session.token_ttl.is_zero() {
            return Err(ConfigError::Invalid {
                field: "session.token_ttl",
                reason: "must be non-zero".to_owned(),
            });
        }
        if !self.session.email_policy.allow_all && self.session.email_policy.suffixes.is_empty() {
            return Err(ConfigError::Invalid {
                field: "session.email_policy",
                reason: "suffixes must not be empty unless allow_all is set".to_owned(),
            });
        }
        if self.cas_retry.max_retries > MAX_CAS_RETRIES {
            return Err(ConfigError::Invalid {
                field: "cas_retry.max_retries",
                reason: format!("must not exceed {MAX_CAS_RETRIES}"),
            });
        }
        Ok(())
    }

    /// The retry policy for atomic transforms.
    pub fn cas_retry_config(&self) -> CasRetryConfig {
        self.cas_retry.into()
    }
}

fn check_min(field: &'static str, value: Duration, min: Duration) -> Result<(), ConfigError> {
    if value < min {
        return Err(ConfigError::BelowMinimum {
            field,
            min: format!("{min:?}"),
            value: format!("{value:?}"),
        });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use appstore_authn::EmailPolicy;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppStoreConfig::default();
        config.validate().unwrap();
        assert_eq!(config.prefix, "");
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.session.code_length, 4);
        assert_eq!(config.cas_retry.max_retries, 5);
        assert_eq!(config.cas_retry.base_delay, Duration::from_millis(10));
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config: AppStoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AppStoreConfig::default());
    }

    #[test]
    fn parses_humantime_durations() {
        let config: AppStoreConfig = serde_json::from_str(
            r#"{"cache_ttl":"2m","request_timeout":"3s","cas_retry":{"max_retries":2,"base_delay":"5ms"}}"#,
        )
        .unwrap();
        assert_eq!(config.cache_ttl, Duration::from_secs(120));
        assert_eq!(config.request_timeout, Duration::from_secs(3));
        assert_eq!(config.cas_retry_config().max_retries, 2);
        assert_eq!(config.cas_retry_config().base_delay, Duration::from_millis(5));
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(serde_json::from_str::<AppStoreConfig>(r#"{"cacheExpires":300}"#).is_err());
    }

    #[test]
    fn rejects_tiny_cache_ttl() {
        let config = AppStoreConfig::builder().cache_ttl(Duration::from_millis(5)).build();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BelowMinimum { field: "cache_ttl", .. })
        ));
    }

    #[test]
    fn rejects_empty_suffix_list_without_allow_all() {
        let config = AppStoreConfig::builder()
            .session(
                SessionConfig::builder()
                    .email_policy(EmailPolicy::suffixes(Vec::<String>::new()))
                    .build(),
            )
            .build();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "session.email_policy", .. })
        ));
    }

    #[test]
    fn rejects_zero_code_length() {
        let config = AppStoreConfig::builder()
            .session(SessionConfig::builder().code_length(0).build())
            .build();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "session.code_length", .. })
        ));
    }
}
