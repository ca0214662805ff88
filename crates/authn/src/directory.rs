//! User identity lookup.
//!
//! The app store never owns user records; it resolves an email address to a
//! stable uid through a [`UserDirectory`]. [`MemoryUserDirectory`] backs
//! tests and single-process deployments.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

/// A resolved user identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable user id.
    pub id: String,
    /// Login email address.
    pub email: String,
}

/// External identity collaborator.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Resolves `email` to a user, creating the user when `auto_create` is
    /// set and none exists.
    ///
    /// # Errors
    ///
    /// - [`AuthError::UserNotFound`] if the user does not exist and `auto_create` is `false`
    /// - [`AuthError::Directory`] on collaborator failure
    async fn lookup_by_email(&self, email: &str, auto_create: bool) -> Result<User>;

    /// Resolves a uid to its user.
    ///
    /// # Errors
    ///
    /// - [`AuthError::UserNotFound`] if no user has this uid
    /// - [`AuthError::Directory`] on collaborator failure
    async fn lookup_by_uid(&self, uid: &str) -> Result<User>;
}

#[derive(Debug, Default)]
struct DirectoryState {
    by_email: HashMap<String, User>,
    by_uid: HashMap<String, String>,
    next_id: u64,
}

/// In-memory [`UserDirectory`] assigning sequential uids.
///
/// Clones share the same user table.
#[derive(Debug, Clone, Default)]
pub struct MemoryUserDirectory {
    state: Arc<RwLock<DirectoryState>>,
}

impl MemoryUserDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user with an explicit uid, replacing any previous record
    /// for the same email.
    pub fn insert(&self, id: impl Into<String>, email: impl Into<String>) -> User {
        let user = User { id: id.into(), email: email.into() };
        let mut state = self.state.write();
        state.by_uid.insert(user.id.clone(), user.email.clone());
        state.by_email.insert(user.email.clone(), user.clone());
        user
    }

    /// Number of known users.
    pub fn len(&self) -> usize {
        self.state.read().by_email.len()
    }

    /// Returns `true` if the directory has no users.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn lookup_by_email(&self, email: &str, auto_create: bool) -> Result<User> {
        if let Some(user) = self.state.read().by_email.get(email) {
            return Ok(user.clone());
        }
        if !auto_create {
            return Err(AuthError::UserNotFound(email.to_owned()));
        }

        let mut state = self.state.write();
        // Another caller may have created the user between the two locks.
        if let Some(user) = state.by_email.get(email) {
            return Ok(user.clone());
        }
        let id = loop {
            state.next_id += 1;
            let candidate = format!("u{}", state.next_id);
            if !state.by_uid.contains_key(&candidate) {
                break candidate;
            }
        };
        let user = User { id, email: email.to_owned() };
        state.by_uid.insert(user.id.clone(), user.email.clone());
        state.by_email.insert(user.email.clone(), user.clone());
        tracing::debug!(uid = %user.id, "Created user");
        Ok(user)
    }

    async fn lookup_by_uid(&self, uid: &str) -> Result<User> {
        let state = self.state.read();
        state
            .by_uid
            .get(uid)
            .and_then(|email| state.by_email.get(email))
            .cloned()
            .ok_or_else(|| AuthError::UserNotFound(uid.to_owned()))
    }
}
