//! Input validators.
//!
//! Patterns are compiled once into a [`Validators`] context owned by the
//! [`AppStore`](crate::AppStore); nothing is compiled per request.

use appstore_authn::{EmailPolicy, EmailValidator};
use regex::Regex;

use crate::error::{AppStoreError, Result};

/// Accepted version strings: `major.minor`, optional `.patch`, optional `-build`.
pub const VERSION_PATTERN: &str = r"^\d+\.\d+(\.\d+)?(-\d+)?$";

/// Accepted artifact ability names.
pub const ABILITY_PATTERN: &str = r"^[a-zA-Z0-9_\-]+$";

/// Compiled input validators.
#[derive(Debug, Clone)]
pub struct Validators {
    version: Regex,
    ability: Regex,
    email: EmailValidator,
}

impl Validators {
    /// Compiles every pattern.
    ///
    /// Member emails are checked for shape only; the login policy applies to
    /// the session gate, not to the people an owner invites.
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::Internal`] if a pattern fails to compile.
    pub fn new() -> Result<Self> {
        Ok(Self {
            version: compile(VERSION_PATTERN)?,
            ability: compile(ABILITY_PATTERN)?,
            email: EmailValidator::new(EmailPolicy::allow_all())?,
        })
    }

    /// Checks a version string.
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::InvalidInput`] for field `ver`.
    pub fn version(&self, ver: &str) -> Result<()> {
        if !self.version.is_match(ver) {
            return Err(AppStoreError::invalid("ver", format!("malformed version {ver:?}")));
        }
        Ok(())
    }

    /// Checks an ability name.
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::InvalidInput`] for field `ability`.
    pub fn ability(&self, ability: &str) -> Result<()> {
        if !self.ability.is_match(ability) {
            return Err(AppStoreError::invalid("ability", format!("malformed ability {ability:?}")));
        }
        Ok(())
    }

    /// Checks the shape of an email address.
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::InvalidInput`] for field `email`.
    pub fn email(&self, email: &str) -> Result<()> {
        Ok(self.email.validate(email)?)
    }

    /// Fails if `value` is empty.
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::InvalidInput`] for `field`.
    pub fn required(&self, field: &str, value: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(AppStoreError::invalid(field, "is required"));
        }
        Ok(())
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| AppStoreError::internal_with_source(format!("bad pattern {pattern}"), e))
}
