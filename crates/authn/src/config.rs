//! Session gate configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default login code length.
pub const DEFAULT_CODE_LENGTH: usize = 4;

/// Default lifetime of a pending login code.
pub const DEFAULT_CODE_TTL: Duration = Duration::from_secs(300);

/// Default minimum interval between two login codes for one email.
pub const DEFAULT_CODE_RESEND_COOLDOWN: Duration = Duration::from_secs(60);

/// Default session token lifetime.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Longest login code the gate will generate.
pub const MAX_CODE_LENGTH: usize = 12;

/// Which email addresses may request login codes.
///
/// `allow_all` replaces the `*` wildcard of older deployments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmailPolicy {
    /// Accept every well-formed address.
    #[serde(default)]
    pub allow_all: bool,

    /// Accepted address suffixes, e.g. `@example.com`.
    #[serde(default)]
    pub suffixes: Vec<String>,
}

impl EmailPolicy {
    /// A policy accepting every well-formed address.
    #[must_use]
    pub fn allow_all() -> Self {
        Self { allow_all: true, suffixes: Vec::new() }
    }

    /// A policy accepting only addresses ending in one of `suffixes`.
    #[must_use]
    pub fn suffixes<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { allow_all: false, suffixes: suffixes.into_iter().map(Into::into).collect() }
    }

    /// Returns `true` if `email` is accepted.
    pub fn is_allowed(&self, email: &str) -> bool {
        self.allow_all || self.suffixes.iter().any(|suffix| email.ends_with(suffix.as_str()))
    }
}

impl Default for EmailPolicy {
    fn default() -> Self {
        Self::allow_all()
    }
}

/// Configuration for [`SessionGate`](crate::SessionGate).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use appstore_authn::{EmailPolicy, SessionConfig};
///
/// let config = SessionConfig::builder()
///     .prefix("store:".to_owned())
///     .code_length(6)
///     .token_ttl(Duration::from_secs(3600))
///     .email_policy(EmailPolicy::suffixes(["@example.com"]))
///     .build();
///
/// assert_eq!(config.code_resend_cooldown, Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Prefix prepended to every cache key.
    #[serde(default)]
    #[builder(default)]
    pub prefix: String,

    /// Number of characters in a login code.
    #[serde(default = "default_code_length")]
    #[builder(default = DEFAULT_CODE_LENGTH)]
    pub code_length: usize,

    /// Lifetime of a pending login code.
    #[serde(with = "humantime_serde", default = "default_code_ttl")]
    #[builder(default = DEFAULT_CODE_TTL)]
    pub code_ttl: Duration,

    /// Minimum interval between two codes for the same email.
    #[serde(with = "humantime_serde", default = "default_code_resend_cooldown")]
    #[builder(default = DEFAULT_CODE_RESEND_COOLDOWN)]
    pub code_resend_cooldown: Duration,

    /// Session token lifetime.
    #[serde(with = "humantime_serde", default = "default_token_ttl")]
    #[builder(default = DEFAULT_TOKEN_TTL)]
    pub token_ttl: Duration,

    /// Accepted email addresses.
    #[serde(default)]
    #[builder(default)]
    pub email_policy: EmailPolicy,
}

fn default_code_length() -> usize {
    DEFAULT_CODE_LENGTH
}

fn default_code_ttl() -> Duration {
    DEFAULT_CODE_TTL
}

fn default_code_resend_cooldown() -> Duration {
    DEFAULT_CODE_RESEND_COOLDOWN
}

fn default_token_ttl() -> Duration {
    DEFAULT_TOKEN_TTL
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SessionConfig {
    /// Cache key holding the pending login code for `email`.
    pub(crate) fn code_key(&self, email: &str) -> String {
        format!("{}login_code/{email}", self.prefix)
    }

    /// Cache key marking the resend cooldown for `email`.
    pub(crate) fn cooldown_key(&self, email: &str) -> String {
        format!("{}login_cooldown/{email}", self.prefix)
    }

    /// Cache key mapping a session token to its uid.
    pub(crate) fn token_key(&self, token: &str) -> String {
        format!("{}token/{token}", self.prefix)
    }
}
