//! The app store service.
//!
//! [`AppStore`] owns every component and exposes the public operations.
//! Collaborators are passed in once through [`Collaborators`]; the
//! configuration is validated before anything is built.
//!
//! Every public operation runs under the configured `request_timeout`. An
//! operation that overruns it fails with [`AppStoreError::Unavailable`] and
//! may be retried by the caller.

use std::{future::Future, sync::Arc};

use appstore_authn::{MailDispatcher, SessionGate, User, UserDirectory};
use appstore_storage::{KeyValueCache, StorageBackend};
use tracing::warn;

use crate::{
    access::{CapabilityResolver, RoleBasedResolver, TokenBasedResolver},
    config::{AppStoreConfig, ConfigError},
    error::{AppStoreError, Result},
    metadata::MetadataStore,
    object_store::ObjectStorage,
    validate::Validators,
};

/// External collaborators the app store is built over.
#[derive(bon::Builder)]
pub struct Collaborators {
    /// Document store holding all metadata.
    store: Arc<dyn StorageBackend>,
    /// Cache for metadata reads and session state.
    cache: Arc<dyn KeyValueCache>,
    /// Identity lookup.
    directory: Arc<dyn UserDirectory>,
    /// Login code delivery.
    mailer: Arc<dyn MailDispatcher>,
    /// Signed artifact URLs.
    objects: Arc<dyn ObjectStorage>,
}

/// The app store backend.
///
/// Cheap to clone; clones share every collaborator.
#[derive(Clone)]
pub struct AppStore {
    pub(crate) config: AppStoreConfig,
    pub(crate) meta: MetadataStore,
    pub(crate) sessions: SessionGate,
    pub(crate) directory: Arc<dyn UserDirectory>,
    pub(crate) objects: Arc<dyn ObjectStorage>,
    pub(crate) apps: Arc<dyn CapabilityResolver>,
    pub(crate) containers: Arc<dyn CapabilityResolver>,
    pub(crate) validators: Validators,
}

impl std::fmt::Debug for AppStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppStore")
            .field("config", &self.config)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

impl AppStore {
    /// Validates `config` and wires the components over `collaborators`.
    ///
    /// Session keys share the metadata prefix unless `config.session.prefix`
    /// is set.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the configuration is out of bounds.
    pub fn new(
        collaborators: Collaborators,
        config: AppStoreConfig,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        let Collaborators { store, cache, directory, mailer, objects } = collaborators;

        let mut session_config = config.session.clone();
        if session_config.prefix.is_empty() {
            session_config.prefix.clone_from(&config.prefix);
        }
        let sessions =
            SessionGate::new(Arc::clone(&cache), Arc::clone(&directory), mailer, session_config)
                .map_err(|e| ConfigError::Invalid { field: "session", reason: e.to_string() })?;

        let validators = Validators::new()
            .map_err(|e| ConfigError::Invalid { field: "validators", reason: e.to_string() })?;

        let meta = MetadataStore::new(
            store,
            cache,
            config.prefix.clone(),
            config.cache_ttl,
            config.cas_retry_config(),
        );

        Ok(Self {
            apps: Arc::new(TokenBasedResolver::new(meta.clone())),
            containers: Arc::new(RoleBasedResolver::new(meta.clone())),
            config,
            meta,
            sessions,
            directory,
            objects,
            validators,
        })
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &AppStoreConfig {
        &self.config
    }

    /// Returns the metadata store.
    pub fn metadata(&self) -> &MetadataStore {
        &self.meta
    }

    /// Returns the resolver for app capabilities.
    pub fn app_resolver(&self) -> &dyn CapabilityResolver {
        self.apps.as_ref()
    }

    /// Returns the resolver for container capabilities.
    pub fn container_resolver(&self) -> &dyn CapabilityResolver {
        self.containers.as_ref()
    }

    /// Runs `operation` under the request deadline.
    pub(crate) async fn within<T>(
        &self,
        name: &'static str,
        operation: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let budget = self.config.request_timeout;
        match tokio::time::timeout(budget, operation).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation = name, ?budget, "Request deadline exceeded");
                Err(AppStoreError::unavailable(format!("{name} timed out after {budget:?}")))
            },
        }
    }

    pub(crate) async fn uid(&self, token: &str) -> Result<String> {
        Ok(self.sessions.resolve_uid(token).await?)
    }

    /// Mails a login code to `email`.
    ///
    /// # Errors
    ///
    /// - [`AppStoreError::InvalidInput`] if the email is malformed or not allowed
    /// - [`AppStoreError::RateLimited`] within the resend cooldown
    /// - [`AppStoreError::Unavailable`] if mail dispatch fails
    #[tracing::instrument(skip(self))]
    pub async fn issue_login_code(&self, email: &str) -> Result<()> {
        self.within("issue_login_code", async { Ok(self.sessions.issue_login_code(email).await?) })
            .await
    }

    /// Exchanges a login code for a session token.
    ///
    /// # Errors
    ///
    /// - [`AppStoreError::InvalidInput`] on an empty code or a bad email
    /// - [`AppStoreError::NotFound`] if no code is pending
    /// - [`AppStoreError::CodeMismatch`] if the code is wrong
    #[tracing::instrument(skip(self, code))]
    pub async fn login(&self, email: &str, code: &str) -> Result<String> {
        self.within("login", async { Ok(self.sessions.login(email, code).await?) }).await
    }

    /// Ends a session. Unknown tokens are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::Unavailable`] if the cache fails.
    #[tracing::instrument(skip_all)]
    pub async fn logout(&self, token: &str) -> Result<()> {
        self.within("logout", async { Ok(self.sessions.logout(token).await?) }).await
    }

    /// Resolves a session token to its uid.
    ///
    /// # Errors
    ///
    /// - [`AppStoreError::InvalidInput`] on an empty token
    /// - [`AppStoreError::NotLoggedIn`] if the session is unknown or expired
    #[tracing::instrument(skip_all)]
    pub async fn resolve_uid(&self, token: &str) -> Result<String> {
        self.within("resolve_uid", self.uid(token)).await
    }

    /// Returns the user behind a session token.
    ///
    /// # Errors
    ///
    /// - [`AppStoreError::NotLoggedIn`] if the session is unknown or expired
    /// - [`AppStoreError::NotFound`] if the directory no longer knows the user
    #[tracing::instrument(skip_all)]
    pub async fn current_user(&self, token: &str) -> Result<User> {
        self.within("current_user", async { Ok(self.sessions.current_user(token).await?) }).await
    }
}

/// A fresh random resource id.
pub(crate) fn new_id() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}

/// A fresh random container secret.
pub(crate) fn new_secret() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}
