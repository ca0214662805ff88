//! Containers, approvals and signed artifact delivery.
//!
//! Containers authenticate with a shared secret instead of a session: each
//! request carries a timestamp and a signature over its fields (see
//! [`appstore_authn::sign`]). An app owner approves a container once, and
//! from then on the container may fetch any published artifact of that app.

use std::collections::BTreeMap;

use appstore_authn::verify_signature;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    access::{Capability, require},
    apps::remove_member,
    error::{AppStoreError, Result},
    keys,
    model::{
        Approval, AppVersion, Container, ContainerInfo, ContainerInfoRequest, FetchGrant, Member,
        Ownership, Page, Paged, ResourceKind, Role, SignedFetchRequest,
    },
    service::{AppStore, new_id, new_secret},
};

impl AppStore {
    /// Creates a container owned by the caller.
    ///
    /// The id and secret are generated; the returned record is the only
    /// place the caller learns the secret.
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::NotLoggedIn`] without a valid session.
    #[tracing::instrument(skip(self, token, info))]
    pub async fn create_container(&self, token: &str, info: Option<Value>) -> Result<Container> {
        self.within("create_container", async {
            let uid = self.uid(token).await?;

            let container = Container { id: new_id(), secret: new_secret(), ver: 1, info };
            let paths = [
                keys::container(&container.id),
                keys::container_member(&container.id, &uid),
                keys::ownership(&uid, ResourceKind::Container, &container.id),
            ];
            let ownership = Ownership {
                kind: ResourceKind::Container,
                id: container.id.clone(),
                title: String::new(),
            };

            self.meta
                .atomic_transform(&paths, |snapshot, changes| {
                    if paths.iter().any(|p| snapshot.exists(p)) {
                        return Err(AppStoreError::conflict("container id already in use"));
                    }
                    changes.put_object(&paths[0], &container)?;
                    changes.put_object(&paths[1], &Member::owner(uid.as_str()))?;
                    changes.put_object(&paths[2], &ownership)?;
                    Ok(())
                })
                .await?;

            debug!(container = %container.id, %uid, "Container created");
            Ok(container)
        })
        .await
    }

    /// Updates a container and bumps its revision.
    ///
    /// `info`, when given, replaces the attachment; `rotate_secret` issues a
    /// new secret, after which requests signed with the old one fail.
    ///
    /// # Errors
    ///
    /// - [`AppStoreError::PermissionDenied`] without `write`
    /// - [`AppStoreError::NotFound`] if the container does not exist
    #[tracing::instrument(skip(self, token, info))]
    pub async fn update_container(
        &self,
        token: &str,
        id: &str,
        info: Option<Value>,
        rotate_secret: bool,
    ) -> Result<Container> {
        self.within("update_container", async {
            let uid = self.uid(token).await?;
            require(self.containers.as_ref(), &uid, id, Capability::Write).await?;

            let path = keys::container(id);
            let secret = rotate_secret.then(new_secret);
            let container = self
                .meta
                .atomic_transform(std::slice::from_ref(&path), |snapshot, changes| {
                    let mut container = snapshot
                        .get_object::<Container>(&path)?
                        .ok_or_else(|| AppStoreError::not_found(format!("container {id}")))?;
                    container.ver += 1;
                    if let Some(info) = &info {
                        container.info = Some(info.clone());
                    }
                    if let Some(secret) = &secret {
                        container.secret.clone_from(secret);
                    }
                    changes.put_object(&path, &container)?;
                    Ok(container)
                })
                .await?;

            debug!(container = id, ver = container.ver, rotated = rotate_secret, "Container updated");
            Ok(container)
        })
        .await
    }

    /// Returns a container the caller can read.
    ///
    /// # Errors
    ///
    /// - [`AppStoreError::PermissionDenied`] without `read`
    /// - [`AppStoreError::NotFound`] if the container does not exist
    #[tracing::instrument(skip(self, token))]
    pub async fn get_container(&self, token: &str, id: &str) -> Result<Container> {
        self.within("get_container", async {
            let uid = self.uid(token).await?;
            require(self.containers.as_ref(), &uid, id, Capability::Read).await?;
            self.load_container(id).await
        })
        .await
    }

    /// Lists the containers the caller owns, in id order.
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::NotLoggedIn`] without a valid session.
    #[tracing::instrument(skip(self, token))]
    pub async fn list_my_containers(&self, token: &str, page: Page) -> Result<Paged<Container>> {
        self.within("list_my_containers", async {
            let uid = self.uid(token).await?;
            let owned =
                self.meta.list::<Ownership>(&keys::owned(&uid, ResourceKind::Container)).await?;
            let paged = page.apply(owned);

            let mut items = Vec::with_capacity(paged.items.len());
            for (path, ownership) in paged.items {
                match self.meta.get_object::<Container>(&keys::container(&ownership.id)).await? {
                    Some(container) => items.push(container),
                    None => debug!(%path, "Ownership record without container, skipping"),
                }
            }
            Ok(Paged { page: paged.page, items })
        })
        .await
    }

    /// Answers a container's signed poll for its own configuration.
    ///
    /// `info` is returned only when the stored revision is newer than the
    /// one the container holds.
    ///
    /// # Errors
    ///
    /// - [`AppStoreError::SignatureInvalid`] on an unknown container, a bad
    ///   signature or a stale timestamp
    #[tracing::instrument(skip_all, fields(container = %request.id, ver = request.ver))]
    pub async fn container_info(&self, request: &ContainerInfoRequest) -> Result<ContainerInfo> {
        self.within("container_info", async {
            let container = self
                .signed_container(&request.id, &request.fields(), &request.sign, request.timestamp)
                .await?;

            let info = if request.ver < container.ver { container.info } else { None };
            Ok(ContainerInfo { ver: container.ver, info })
        })
        .await
    }

    /// Adds or updates a container member with `role`.
    ///
    /// Adding the owner returns the OWNER record unchanged.
    ///
    /// # Errors
    ///
    /// - [`AppStoreError::InvalidInput`] on a malformed email or `role == OWNER`
    /// - [`AppStoreError::PermissionDenied`] unless the caller owns the container
    /// - [`AppStoreError::NotFound`] if the directory does not know `email`
    #[tracing::instrument(skip(self, token))]
    pub async fn add_container_member(
        &self,
        token: &str,
        id: &str,
        email: &str,
        role: Role,
    ) -> Result<Member> {
        self.within("add_container_member", async {
            self.validators.email(email)?;
            if role == Role::Owner {
                return Err(AppStoreError::invalid("role", "OWNER cannot be granted"));
            }
            let uid = self.uid(token).await?;
            require(self.containers.as_ref(), &uid, id, Capability::Own).await?;

            let target = self.directory.lookup_by_email(email, false).await?;
            let path = keys::container_member(id, &target.id);

            let member = self
                .meta
                .atomic_transform(std::slice::from_ref(&path), |snapshot, changes| {
                    let existing = snapshot.get_object::<Member>(&path)?;
                    if let Some(owner) = existing.as_ref().filter(|m| m.is_owner()) {
                        return Ok(owner.clone());
                    }
                    let member = Member {
                        id: target.id.clone(),
                        role: Some(role),
                        allow: None,
                        title: existing.and_then(|m| m.title),
                    };
                    changes.put_object(&path, &member)?;
                    Ok(member)
                })
                .await?;

            debug!(container = id, member = %member.id, ?role, "Container member saved");
            Ok(member)
        })
        .await
    }

    /// Removes a member from a container and returns the removed record.
    ///
    /// # Errors
    ///
    /// - [`AppStoreError::PermissionDenied`] unless the caller owns the container
    /// - [`AppStoreError::NotFound`] if `email` is unknown or not a member
    /// - [`AppStoreError::Conflict`] if `email` belongs to the owner
    #[tracing::instrument(skip(self, token))]
    pub async fn remove_container_member(
        &self,
        token: &str,
        id: &str,
        email: &str,
    ) -> Result<Member> {
        self.within("remove_container_member", async {
            self.validators.email(email)?;
            let uid = self.uid(token).await?;
            require(self.containers.as_ref(), &uid, id, Capability::Own).await?;

            let target = self.directory.lookup_by_email(email, false).await?;
            let path = keys::container_member(id, &target.id);
            self.meta.atomic_transform(std::slice::from_ref(&path), remove_member(&path)).await
        })
        .await
    }

    /// Allows `container_id` to fetch artifacts of `appid`.
    ///
    /// Approving twice keeps the first approval.
    ///
    /// # Errors
    ///
    /// - [`AppStoreError::PermissionDenied`] unless the caller owns the app
    /// - [`AppStoreError::NotFound`] if the container does not exist
    #[tracing::instrument(skip(self, token))]
    pub async fn approve(&self, token: &str, appid: &str, container_id: &str) -> Result<Approval> {
        self.within("approve", async {
            let uid = self.uid(token).await?;
            require(self.apps.as_ref(), &uid, appid, Capability::Own).await?;
            self.ensure_container(container_id).await?;

            let path = keys::approval(appid, container_id);
            let approval = Approval { approved_by: uid, approved_at: Utc::now() };
            let approval = self
                .meta
                .atomic_transform(std::slice::from_ref(&path), |snapshot, changes| {
                    if let Some(existing) = snapshot.get_object::<Approval>(&path)? {
                        return Ok(existing);
                    }
                    changes.put_object(&path, &approval)?;
                    Ok(approval.clone())
                })
                .await?;

            debug!(appid, container = container_id, "Container approved");
            Ok(approval)
        })
        .await
    }

    /// Withdraws an approval. Withdrawing an absent approval is not an error.
    ///
    /// # Errors
    ///
    /// - [`AppStoreError::PermissionDenied`] unless the caller owns the app
    /// - [`AppStoreError::NotFound`] if the container does not exist
    #[tracing::instrument(skip(self, token))]
    pub async fn unapprove(&self, token: &str, appid: &str, container_id: &str) -> Result<()> {
        self.within("unapprove", async {
            let uid = self.uid(token).await?;
            require(self.apps.as_ref(), &uid, appid, Capability::Own).await?;
            self.ensure_container(container_id).await?;

            self.meta.delete(&keys::approval(appid, container_id)).await?;
            debug!(appid, container = container_id, "Container approval withdrawn");
            Ok(())
        })
        .await
    }

    /// Serves a container's signed request for one artifact.
    ///
    /// Checks run in order: signature, approval, version, ability. The first
    /// failing check decides the error. An unknown container fails the
    /// signature check, so unsigned callers learn nothing about which
    /// containers exist.
    ///
    /// # Errors
    ///
    /// - [`AppStoreError::InvalidInput`] on a malformed version or ability
    /// - [`AppStoreError::SignatureInvalid`] on an unknown container, a bad
    ///   signature or a stale timestamp
    /// - [`AppStoreError::PermissionDenied`] if the container is not approved for the app
    /// - [`AppStoreError::NotFound`] if the version is unpublished or lacks the ability
    #[tracing::instrument(
        skip_all,
        fields(container = %request.id, appid = %request.appid, ver = %request.ver, ability = %request.ability)
    )]
    pub async fn signed_fetch(&self, request: &SignedFetchRequest) -> Result<FetchGrant> {
        self.within("signed_fetch", async {
            self.validators.version(&request.ver)?;
            self.validators.ability(&request.ability)?;

            let container = self
                .signed_container(&request.id, &request.fields(), &request.sign, request.timestamp)
                .await?;

            if !self.meta.exists(&keys::approval(&request.appid, &request.id)).await? {
                debug!("Container not approved for app");
                return Err(AppStoreError::PermissionDenied);
            }

            let version = self
                .meta
                .get_object::<AppVersion>(&keys::app_version(&request.appid, &request.ver))
                .await?
                .filter(AppVersion::is_published)
                .ok_or_else(|| {
                    AppStoreError::not_found(format!("version {}@{}", request.appid, request.ver))
                })?;
            if !version.has_ability(&request.ability) {
                return Err(AppStoreError::not_found(format!(
                    "ability {} of {}@{}",
                    request.ability, request.appid, request.ver
                )));
            }

            let key = keys::artifact(&request.appid, &request.ver, &request.ability);
            let url = self.objects.signed_get_url(&key, self.config.download_url_ttl).await?;
            debug!(%key, "Download URL issued");
            Ok(FetchGrant { url, version })
        })
        .await
    }

    async fn load_container(&self, id: &str) -> Result<Container> {
        self.meta
            .get_object(&keys::container(id))
            .await?
            .ok_or_else(|| AppStoreError::not_found(format!("container {id}")))
    }

    async fn ensure_container(&self, id: &str) -> Result<()> {
        if !self.meta.exists(&keys::container(id)).await? {
            return Err(AppStoreError::not_found(format!("container {id}")));
        }
        Ok(())
    }

    /// Loads the container a signed request claims to come from and verifies
    /// the request against its secret.
    async fn signed_container(
        &self,
        id: &str,
        fields: &BTreeMap<&'static str, String>,
        signature: &str,
        timestamp: i64,
    ) -> Result<Container> {
        let Some(container) = self.meta.get_object::<Container>(&keys::container(id)).await? else {
            warn!(container = id, "Signed request from unknown container");
            return Err(AppStoreError::SignatureInvalid);
        };
        verify_signature(
            &container.secret,
            fields,
            signature,
            timestamp,
            self.config.signature_max_age,
        )
        .map_err(|e| {
            warn!(container = id, error = %e, "Container signature rejected");
            AppStoreError::from(e)
        })?;
        Ok(container)
    }
}
