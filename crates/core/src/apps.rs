//! Apps, app members and the version lifecycle.
//!
//! A version moves through the store in two steps. [`request_upload`]
//! mints a signed PUT URL and writes nothing; the client uploads the
//! artifact directly. [`finalize_upload`] then publishes the version row in
//! an atomic transform, so of two concurrent finalizers exactly one wins and
//! the other sees [`AppStoreError::VersionExists`].
//!
//! [`request_upload`]: AppStore::request_upload
//! [`finalize_upload`]: AppStore::finalize_upload

use appstore_authn::AuthError;
use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::{
    access::{Capability, require},
    error::{AppStoreError, Result},
    keys,
    metadata::{Changes, Snapshot},
    model::{
        App, AppVersion, Member, MemberView, Ownership, Page, Paged, ResourceKind, UploadTicket,
        VersionStatus,
    },
    service::{AppStore, new_id},
};

/// Capability tokens an owner may grant on an app.
const GRANTABLE: [Capability; 2] = [Capability::Own, Capability::Dev];

fn check_allow(allow: &str) -> Result<()> {
    for token in allow.split('|').filter(|t| !t.is_empty()) {
        let capability: Capability = token.parse()?;
        if !GRANTABLE.contains(&capability) {
            return Err(AppStoreError::invalid(
                "allow",
                format!("{capability} cannot be granted on an app"),
            ));
        }
    }
    Ok(())
}

impl AppStore {
    /// Creates an app owned by the caller.
    ///
    /// The app record, the OWNER member record and the ownership record are
    /// written in one atomic transform.
    ///
    /// # Errors
    ///
    /// - [`AppStoreError::InvalidInput`] on an empty title
    /// - [`AppStoreError::NotLoggedIn`] without a valid session
    #[tracing::instrument(skip(self, token, info))]
    pub async fn create_app(&self, token: &str, title: &str, info: Option<Value>) -> Result<App> {
        self.within("create_app", async {
            self.validators.required("title", title)?;
            let uid = self.uid(token).await?;

            let app = App { id: new_id(), title: title.to_owned(), info, created_at: Utc::now() };
            let paths = [
                keys::app(&app.id),
                keys::app_member(&app.id, &uid),
                keys::ownership(&uid, ResourceKind::App, &app.id),
            ];
            let ownership =
                Ownership { kind: ResourceKind::App, id: app.id.clone(), title: app.title.clone() };

            self.meta
                .atomic_transform(&paths, |snapshot, changes| {
                    if paths.iter().any(|p| snapshot.exists(p)) {
                        return Err(AppStoreError::conflict("app id already in use"));
                    }
                    changes.put_object(&paths[0], &app)?;
                    changes.put_object(&paths[1], &Member::owner(uid.as_str()))?;
                    changes.put_object(&paths[2], &ownership)?;
                    Ok(())
                })
                .await?;

            debug!(appid = %app.id, %uid, "App created");
            Ok(app)
        })
        .await
    }

    /// Returns an app the caller can read.
    ///
    /// # Errors
    ///
    /// - [`AppStoreError::PermissionDenied`] without `read`
    /// - [`AppStoreError::NotFound`] if the app does not exist
    #[tracing::instrument(skip(self, token))]
    pub async fn get_app(&self, token: &str, appid: &str) -> Result<App> {
        self.within("get_app", async {
            let uid = self.uid(token).await?;
            require(self.apps.as_ref(), &uid, appid, Capability::Read).await?;
            self.meta
                .get_object(&keys::app(appid))
                .await?
                .ok_or_else(|| AppStoreError::not_found(format!("app {appid}")))
        })
        .await
    }

    /// Lists the apps the caller owns, in id order.
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::NotLoggedIn`] without a valid session.
    #[tracing::instrument(skip(self, token))]
    pub async fn list_my_apps(&self, token: &str, page: Page) -> Result<Paged<App>> {
        self.within("list_my_apps", async {
            let uid = self.uid(token).await?;
            let owned = self.meta.list::<Ownership>(&keys::owned(&uid, ResourceKind::App)).await?;
            let paged = page.apply(owned);

            let mut items = Vec::with_capacity(paged.items.len());
            for (path, ownership) in paged.items {
                match self.meta.get_object::<App>(&keys::app(&ownership.id)).await? {
                    Some(app) => items.push(app),
                    None => debug!(%path, "Ownership record without app, skipping"),
                }
            }
            Ok(Paged { page: paged.page, items })
        })
        .await
    }

    /// Adds or updates a member of an app.
    ///
    /// Non-empty `allow` and `title` replace the stored values; empty ones
    /// keep them. Adding the owner returns the OWNER record unchanged.
    ///
    /// # Errors
    ///
    /// - [`AppStoreError::InvalidInput`] on a malformed email or unknown `allow` token
    /// - [`AppStoreError::PermissionDenied`] unless the caller owns the app
    /// - [`AppStoreError::NotFound`] if the directory does not know `email`
    #[tracing::instrument(skip(self, token))]
    pub async fn add_app_member(
        &self,
        token: &str,
        appid: &str,
        email: &str,
        allow: &str,
        title: &str,
    ) -> Result<Member> {
        self.within("add_app_member", async {
            self.validators.email(email)?;
            check_allow(allow)?;
            let uid = self.uid(token).await?;
            require(self.apps.as_ref(), &uid, appid, Capability::Own).await?;

            let target = self.directory.lookup_by_email(email, false).await?;
            let path = keys::app_member(appid, &target.id);

            let member = self
                .meta
                .atomic_transform(std::slice::from_ref(&path), |snapshot, changes| {
                    let existing = snapshot.get_object::<Member>(&path)?;
                    if let Some(owner) = existing.as_ref().filter(|m| m.is_owner()) {
                        return Ok(owner.clone());
                    }
                    let mut member = existing.unwrap_or_else(|| Member {
                        id: target.id.clone(),
                        role: None,
                        allow: None,
                        title: None,
                    });
                    if !allow.is_empty() {
                        member.allow = Some(allow.to_owned());
                    }
                    if !title.is_empty() {
                        member.title = Some(title.to_owned());
                    }
                    changes.put_object(&path, &member)?;
                    Ok(member)
                })
                .await?;

            debug!(appid, member = %member.id, allow = ?member.allow, "App member saved");
            Ok(member)
        })
        .await
    }

    /// Removes a member from an app and returns the removed record.
    ///
    /// # Errors
    ///
    /// - [`AppStoreError::PermissionDenied`] unless the caller owns the app
    /// - [`AppStoreError::NotFound`] if `email` is unknown or not a member
    /// - [`AppStoreError::Conflict`] if `email` belongs to the owner
    #[tracing::instrument(skip(self, token))]
    pub async fn remove_app_member(&self, token: &str, appid: &str, email: &str) -> Result<Member> {
        self.within("remove_app_member", async {
            self.validators.email(email)?;
            let uid = self.uid(token).await?;
            require(self.apps.as_ref(), &uid, appid, Capability::Own).await?;

            let target = self.directory.lookup_by_email(email, false).await?;
            let path = keys::app_member(appid, &target.id);
            self.meta.atomic_transform(std::slice::from_ref(&path), remove_member(&path)).await
        })
        .await
    }

    /// Lists an app's members with their emails, in uid order.
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::PermissionDenied`] unless the caller owns the
    /// app.
    #[tracing::instrument(skip(self, token))]
    pub async fn list_app_members(
        &self,
        token: &str,
        appid: &str,
        page: Page,
    ) -> Result<Paged<MemberView>> {
        self.within("list_app_members", async {
            let uid = self.uid(token).await?;
            require(self.apps.as_ref(), &uid, appid, Capability::Own).await?;

            let members = self.meta.list::<Member>(&keys::app_members(appid)).await?;
            let paged = page.apply(members);

            let mut items = Vec::with_capacity(paged.items.len());
            for (_, member) in paged.items {
                let email = match self.directory.lookup_by_uid(&member.id).await {
                    Ok(user) => Some(user.email),
                    Err(AuthError::UserNotFound(_)) => None,
                    Err(e) => return Err(e.into()),
                };
                items.push(MemberView { member, email });
            }
            Ok(Paged { page: paged.page, items })
        })
        .await
    }

    /// Mints an upload URL for one artifact of an unpublished version.
    ///
    /// The version row is read from the store, not the cache, and nothing is
    /// written.
    ///
    /// # Errors
    ///
    /// - [`AppStoreError::InvalidInput`] on a malformed version or ability
    /// - [`AppStoreError::PermissionDenied`] without `dev`
    /// - [`AppStoreError::VersionExists`] if the version is already published
    #[tracing::instrument(skip(self, token))]
    pub async fn request_upload(
        &self,
        token: &str,
        appid: &str,
        ver: &str,
        ability: &str,
    ) -> Result<UploadTicket> {
        self.within("request_upload", async {
            self.validators.version(ver)?;
            self.validators.ability(ability)?;
            let uid = self.uid(token).await?;
            require(self.apps.as_ref(), &uid, appid, Capability::Dev).await?;

            let current: Option<AppVersion> =
                self.meta.get_object_fresh(&keys::app_version(appid, ver)).await?;
            if current.is_some_and(|v| v.is_published()) {
                return Err(version_exists(appid, ver));
            }

            let key = keys::artifact(appid, ver, ability);
            let ticket = self.objects.signed_put_url(&key, self.config.upload_url_ttl).await?;
            debug!(%key, "Upload URL issued");
            Ok(ticket)
        })
        .await
    }

    /// Publishes a version.
    ///
    /// `info` is stored as given; its top-level keys name the abilities that
    /// can later be fetched.
    ///
    /// # Errors
    ///
    /// - [`AppStoreError::InvalidInput`] on a malformed version
    /// - [`AppStoreError::PermissionDenied`] without `dev`
    /// - [`AppStoreError::VersionExists`] if the version is already published
    #[tracing::instrument(skip(self, token, info))]
    pub async fn finalize_upload(
        &self,
        token: &str,
        appid: &str,
        ver: &str,
        title: &str,
        info: Value,
    ) -> Result<AppVersion> {
        self.within("finalize_upload", async {
            self.validators.version(ver)?;
            let uid = self.uid(token).await?;
            require(self.apps.as_ref(), &uid, appid, Capability::Dev).await?;

            let path = keys::app_version(appid, ver);
            let published_at = Utc::now();
            let version = self
                .meta
                .atomic_transform(std::slice::from_ref(&path), |snapshot, changes| {
                    let current = snapshot.get_object::<AppVersion>(&path)?;
                    if current.is_some_and(|v| v.is_published()) {
                        return Err(version_exists(appid, ver));
                    }
                    let version = AppVersion {
                        appid: appid.to_owned(),
                        ver: ver.to_owned(),
                        title: title.to_owned(),
                        status: VersionStatus::Ok,
                        info: info.clone(),
                        published_at,
                    };
                    changes.put_object(&path, &version)?;
                    Ok(version)
                })
                .await?;

            debug!(appid, ver, %uid, "Version published");
            Ok(version)
        })
        .await
    }

    /// Returns a published version.
    ///
    /// # Errors
    ///
    /// - [`AppStoreError::PermissionDenied`] without `read`
    /// - [`AppStoreError::NotFound`] if the version is absent or unpublished
    #[tracing::instrument(skip(self, token))]
    pub async fn get_version_info(&self, token: &str, appid: &str, ver: &str) -> Result<AppVersion> {
        self.within("get_version_info", async {
            self.validators.version(ver)?;
            let uid = self.uid(token).await?;
            require(self.apps.as_ref(), &uid, appid, Capability::Read).await?;

            self.meta
                .get_object::<AppVersion>(&keys::app_version(appid, ver))
                .await?
                .filter(AppVersion::is_published)
                .ok_or_else(|| AppStoreError::not_found(format!("version {appid}@{ver}")))
        })
        .await
    }

    /// Lists an app's published versions in path order.
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::PermissionDenied`] without `dev`.
    #[tracing::instrument(skip(self, token))]
    pub async fn list_versions(
        &self,
        token: &str,
        appid: &str,
        page: Page,
    ) -> Result<Paged<AppVersion>> {
        self.within("list_versions", async {
            let uid = self.uid(token).await?;
            require(self.apps.as_ref(), &uid, appid, Capability::Dev).await?;

            let versions: Vec<AppVersion> = self
                .meta
                .list::<AppVersion>(&keys::app_versions(appid))
                .await?
                .into_iter()
                .map(|(_, v)| v)
                .filter(AppVersion::is_published)
                .collect();
            Ok(page.apply(versions))
        })
        .await
    }
}

fn version_exists(appid: &str, ver: &str) -> AppStoreError {
    AppStoreError::VersionExists { appid: appid.to_owned(), ver: ver.to_owned() }
}

/// Transform that deletes a non-owner member record at `path`.
pub(crate) fn remove_member(
    path: &str,
) -> impl Fn(&Snapshot, &mut Changes) -> Result<Member> + Send + Sync + '_ {
    move |snapshot, changes| {
        let member = snapshot
            .get_object::<Member>(path)?
            .ok_or_else(|| AppStoreError::not_found(format!("member {path}")))?;
        if member.is_owner() {
            return Err(AppStoreError::conflict("cannot delete owner member"));
        }
        changes.delete(path);
        Ok(member)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::dev("dev", true)]
    #[case::own_and_dev("own|dev", true)]
    #[case::empty("", true)]
    #[case::write("write", false)]
    #[case::unknown("admin", false)]
    fn allow_tokens(#[case] allow: &str, #[case] ok: bool) {
        assert_eq!(check_allow(allow).is_ok(), ok);
    }
}
