//! Email address validation.
//!
//! An address is accepted for login only if it is well formed and passes the
//! configured [`EmailPolicy`]. The pattern is compiled once per
//! [`EmailValidator`] and shared by every request.

use regex::Regex;

use crate::{config::EmailPolicy, error::AuthError};

/// Pattern every login email must match.
///
/// Local part and domain are restricted to ASCII alphanumerics plus `.`,
/// `-` and `_`, separated by exactly one `@`.
pub const EMAIL_PATTERN: &str = r"^[a-zA-Z0-9._\-]+@[a-zA-Z0-9._\-]+$";

/// Compiled email format check plus the suffix allow-list.
#[derive(Debug, Clone)]
pub struct EmailValidator {
    pattern: Regex,
    policy: EmailPolicy,
}

impl EmailValidator {
    /// Compiles the email pattern and binds it to `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidInput`] if the built-in pattern fails to
    /// compile, which only happens if [`EMAIL_PATTERN`] is edited into an
    /// invalid expression.
    pub fn new(policy: EmailPolicy) -> Result<Self, AuthError> {
        let pattern =
            Regex::new(EMAIL_PATTERN).map_err(|e| AuthError::invalid("email", e.to_string()))?;
        Ok(Self { pattern, policy })
    }

    /// Returns the policy this validator enforces.
    pub fn policy(&self) -> &EmailPolicy {
        &self.policy
    }

    /// Checks `email` against the format and the policy.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidInput`] if the address is empty or malformed
    /// - [`AuthError::EmailNotAllowed`] if no configured suffix matches
    ///
    /// # Examples
    ///
    /// ```
    /// use appstore_authn::{EmailPolicy, validation::EmailValidator};
    ///
    /// let validator = EmailValidator::new(EmailPolicy::suffixes(["@x.com"])).unwrap();
    /// assert!(validator.validate("u1@x.com").is_ok());
    /// assert!(validator.validate("u1@z.com").is_err());
    /// assert!(validator.validate("not-an-email").is_err());
    /// ```
    pub fn validate(&self, email: &str) -> Result<(), AuthError> {
        if email.is_empty() {
            return Err(AuthError::invalid("email", "must not be empty"));
        }
        if !self.pattern.is_match(email) {
            return Err(AuthError::invalid("email", "not a valid email address"));
        }
        if !self.policy.is_allowed(email) {
            return Err(AuthError::EmailNotAllowed(email.to_owned()));
        }
        Ok(())
    }
}
