//! Login codes and session tokens.
//!
//! [`SessionGate`] turns an email address into a session token in two steps:
//!
//! 1. [`issue_login_code`](SessionGate::issue_login_code) mails a short code and stores it under a
//!    TTL key. A second request for the same email within the resend cooldown fails with
//!    [`AuthError::RateLimited`].
//! 2. [`login`](SessionGate::login) consumes the code, resolves the user through the directory
//!    (creating it on first login) and stores `token → uid` for the token lifetime.
//!
//! Every authenticated operation starts with [`resolve_uid`](SessionGate::resolve_uid).
//!
//! # Cache Keys
//!
//! | Key | Value | TTL |
//! |-----|-------|-----|
//! | `{prefix}login_code/{email}` | lower-case code | `code_ttl` |
//! | `{prefix}login_cooldown/{email}` | marker | `code_resend_cooldown` |
//! | `{prefix}token/{token}` | uid | `token_ttl` |

use std::sync::Arc;

use appstore_storage::KeyValueCache;
use rand::Rng;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::{
    config::{MAX_CODE_LENGTH, SessionConfig},
    directory::{User, UserDirectory},
    error::{AuthError, Result},
    mail::{MailDispatcher, TEXT_PLAIN},
    validation::EmailValidator,
};

/// Subject line of login code mails.
pub const LOGIN_CODE_SUBJECT: &str = "Your login code";

/// Bytes of entropy in a session token.
pub const TOKEN_BYTES: usize = 16;

const CODE_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Issues login codes and maps session tokens to user ids.
#[derive(Clone)]
pub struct SessionGate {
    cache: Arc<dyn KeyValueCache>,
    directory: Arc<dyn UserDirectory>,
    mailer: Arc<dyn MailDispatcher>,
    validator: EmailValidator,
    config: SessionConfig,
}

impl std::fmt::Debug for SessionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGate").field("config", &self.config).finish_non_exhaustive()
    }
}

impl SessionGate {
    /// Creates a gate over the given collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidInput`] if `config.code_length` is zero or
    /// longer than [`MAX_CODE_LENGTH`].
    pub fn new(
        cache: Arc<dyn KeyValueCache>,
        directory: Arc<dyn UserDirectory>,
        mailer: Arc<dyn MailDispatcher>,
        config: SessionConfig,
    ) -> Result<Self> {
        if config.code_length == 0 || config.code_length > MAX_CODE_LENGTH {
            return Err(AuthError::invalid(
                "code_length",
                format!("must be between 1 and {MAX_CODE_LENGTH}"),
            ));
        }
        let validator = EmailValidator::new(config.email_policy.clone())?;
        Ok(Self { cache, directory, mailer, validator, config })
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Generates, stores and mails a login code for `email`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidInput`] / [`AuthError::EmailNotAllowed`] if the email is rejected
    /// - [`AuthError::RateLimited`] if a code was issued within the resend cooldown
    /// - [`AuthError::Mail`] if dispatch fails; the cooldown is released so the caller may retry
    /// - [`AuthError::Storage`] on cache failure
    #[tracing::instrument(skip(self))]
    pub async fn issue_login_code(&self, email: &str) -> Result<()> {
        self.validator.validate(email)?;

        let cooldown_key = self.config.cooldown_key(email);
        let acquired = self
            .cache
            .set_if_absent(&cooldown_key, b"1".to_vec(), self.config.code_resend_cooldown)
            .await?;
        if !acquired {
            debug!("Login code requested within resend cooldown");
            return Err(AuthError::RateLimited);
        }

        let code = generate_code(self.config.code_length);
        let code_key = self.config.code_key(email);
        if let Err(e) = self.cache.set(&code_key, code.as_bytes().to_vec(), self.config.code_ttl).await
        {
            self.release(&cooldown_key).await;
            return Err(e.into());
        }

        let recipients = [email.to_owned()];
        if let Err(e) = self
            .mailer
            .send(&recipients, LOGIN_CODE_SUBJECT, &code.to_uppercase(), TEXT_PLAIN)
            .await
        {
            warn!(error = %e, "Login code dispatch failed");
            self.release(&code_key).await;
            self.release(&cooldown_key).await;
            return Err(e);
        }

        debug!("Login code issued");
        Ok(())
    }

    /// Exchanges a login code for a session token.
    ///
    /// The code comparison is case-insensitive and the code is consumed on
    /// success.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidInput`] if `code` is empty or `email` is malformed
    /// - [`AuthError::CodeNotFound`] if no code is pending
    /// - [`AuthError::CodeMismatch`] if the code does not match
    /// - [`AuthError::Directory`] if the user cannot be resolved
    #[tracing::instrument(skip(self, code))]
    pub async fn login(&self, email: &str, code: &str) -> Result<String> {
        if code.is_empty() {
            return Err(AuthError::invalid("code", "must not be empty"));
        }
        self.validator.validate(email)?;

        let code_key = self.config.code_key(email);
        let stored = self
            .cache
            .get(&code_key)
            .await?
            .ok_or_else(|| AuthError::CodeNotFound(email.to_owned()))?;
        if !stored.eq_ignore_ascii_case(code.as_bytes()) {
            debug!("Login code mismatch");
            return Err(AuthError::CodeMismatch);
        }
        // A concurrent login may have consumed the same code since the read.
        if !self.cache.delete_if_equals(&code_key, &stored).await? {
            debug!("Login code already consumed");
            return Err(AuthError::CodeNotFound(email.to_owned()));
        }

        let user = self.directory.lookup_by_email(email, true).await?;
        let token = generate_token();
        self.cache
            .set(&self.config.token_key(&token), user.id.as_bytes().to_vec(), self.config.token_ttl)
            .await?;

        debug!(uid = %user.id, "Session created");
        Ok(token)
    }

    /// Ends a session. Logging out an unknown token is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] on cache failure.
    #[tracing::instrument(skip_all)]
    pub async fn logout(&self, token: &str) -> Result<()> {
        if token.is_empty() {
            return Ok(());
        }
        self.cache.delete(&self.config.token_key(token)).await?;
        Ok(())
    }

    /// Resolves a session token to its uid.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidInput`] if `token` is empty
    /// - [`AuthError::NotLoggedIn`] if the token is unknown or expired
    #[tracing::instrument(skip_all)]
    pub async fn resolve_uid(&self, token: &str) -> Result<String> {
        if token.is_empty() {
            return Err(AuthError::invalid("token", "must not be empty"));
        }
        let value =
            self.cache.get(&self.config.token_key(token)).await?.ok_or(AuthError::NotLoggedIn)?;
        String::from_utf8(value.to_vec()).map_err(|_| {
            warn!("Session entry is not valid UTF-8");
            AuthError::NotLoggedIn
        })
    }

    /// Resolves a session token to the full user record.
    ///
    /// # Errors
    ///
    /// Same as [`resolve_uid`](Self::resolve_uid), plus
    /// [`AuthError::UserNotFound`] if the directory no longer knows the uid.
    #[tracing::instrument(skip_all)]
    pub async fn current_user(&self, token: &str) -> Result<User> {
        let uid = self.resolve_uid(token).await?;
        self.directory.lookup_by_uid(&uid).await
    }

    async fn release(&self, key: &str) {
        if let Err(e) = self.cache.delete(key).await {
            warn!(key, error = %e, "Failed to release session key");
        }
    }
}

/// Generates a lower-case base36 code of `length` characters.
fn generate_code(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| char::from(CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]))
        .collect()
}

/// Generates a hex session token from [`TOKEN_BYTES`] random bytes.
fn generate_token() -> String {
    let mut bytes = Zeroizing::new([0u8; TOKEN_BYTES]);
    rand::rng().fill(&mut bytes[..]);
    hex::encode(&bytes[..])
}
