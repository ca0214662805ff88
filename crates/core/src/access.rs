//! Capability resolution.
//!
//! A [`CapabilityResolver`] answers "which of these capabilities does this
//! user hold on this resource". Apps and containers store membership
//! differently, so each has its own resolver:
//!
//! | Resolver | Resource | Member grants |
//! |----------|----------|---------------|
//! | [`TokenBasedResolver`] | App | `allow` tokens (`own`, `dev`), role when `allow` is empty, implicit `read` |
//! | [`RoleBasedResolver`] | Container | `OWNER` all, `READ_WRITE` write+read, `READ_ONLY` read |
//!
//! Both check the ownership record first: an owner always receives the full
//! requested set, whatever its member record says. Resolvers never fail with
//! a permission error; [`require`] turns an empty grant into
//! [`AppStoreError::PermissionDenied`].

use std::{fmt, str::FromStr};

use async_trait::async_trait;

use crate::{
    error::{AppStoreError, Result},
    keys,
    metadata::MetadataStore,
    model::{Member, ResourceKind, Role},
};

/// A capability on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    /// Full control.
    Own,
    /// May upload versions.
    Dev,
    /// May modify.
    Write,
    /// May read.
    Read,
}

impl Capability {
    /// Every capability.
    pub const ALL: [Capability; 4] =
        [Capability::Own, Capability::Dev, Capability::Write, Capability::Read];

    /// Token spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Own => "own",
            Capability::Dev => "dev",
            Capability::Write => "write",
            Capability::Read => "read",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = AppStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "own" => Ok(Capability::Own),
            "dev" => Ok(Capability::Dev),
            "write" => Ok(Capability::Write),
            "read" => Ok(Capability::Read),
            other => Err(AppStoreError::invalid("allow", format!("unknown capability {other}"))),
        }
    }
}

/// Capabilities granted by a role.
pub fn role_grants(role: Role) -> &'static [Capability] {
    match role {
        Role::Owner => &Capability::ALL,
        Role::ReadWrite => &[Capability::Write, Capability::Read],
        Role::ReadOnly => &[Capability::Read],
    }
}

/// Resolves a user's capabilities on one kind of resource.
#[async_trait]
pub trait CapabilityResolver: Send + Sync {
    /// Returns the subset of `requested` that `uid` holds on `resource_id`,
    /// in `requested` order.
    ///
    /// # Errors
    ///
    /// Only metadata read failures; lack of access is an empty result.
    async fn resolve(
        &self,
        uid: &str,
        resource_id: &str,
        requested: &[Capability],
    ) -> Result<Vec<Capability>>;
}

/// Fails with [`AppStoreError::PermissionDenied`] unless `uid` holds `needed`.
///
/// # Errors
///
/// - [`AppStoreError::PermissionDenied`] if the capability is not held
/// - Metadata read failures
pub async fn require(
    resolver: &dyn CapabilityResolver,
    uid: &str,
    resource_id: &str,
    needed: Capability,
) -> Result<()> {
    let granted = resolver.resolve(uid, resource_id, &[needed]).await?;
    if granted.is_empty() {
        tracing::debug!(uid, resource_id, %needed, "Capability denied");
        return Err(AppStoreError::PermissionDenied);
    }
    Ok(())
}

fn intersect(requested: &[Capability], granted: impl Fn(Capability) -> bool) -> Vec<Capability> {
    requested.iter().copied().filter(|c| granted(*c)).collect()
}

async fn owns(meta: &MetadataStore, uid: &str, kind: ResourceKind, id: &str) -> Result<bool> {
    meta.exists(&keys::ownership(uid, kind, id)).await
}

/// Resolver for apps: capability tokens on the member record.
#[derive(Debug, Clone)]
pub struct TokenBasedResolver {
    meta: MetadataStore,
}

impl TokenBasedResolver {
    /// Creates a resolver reading through `meta`.
    pub fn new(meta: MetadataStore) -> Self {
        Self { meta }
    }

    /// Grants of an app member record.
    pub fn member_grants(member: &Member, requested: &[Capability]) -> Vec<Capability> {
        let tokens: Vec<Capability> = member.tokens().filter_map(|t| t.parse().ok()).collect();
        if tokens.contains(&Capability::Own) {
            return requested.to_vec();
        }
        if tokens.is_empty()
            && let Some(role) = member.role
        {
            let grants = role_grants(role);
            return intersect(requested, |c| grants.contains(&c));
        }
        intersect(requested, |c| c == Capability::Read || tokens.contains(&c))
    }
}

#[async_trait]
impl CapabilityResolver for TokenBasedResolver {
    #[tracing::instrument(skip(self))]
    async fn resolve(
        &self,
        uid: &str,
        resource_id: &str,
        requested: &[Capability],
    ) -> Result<Vec<Capability>> {
        if owns(&self.meta, uid, ResourceKind::App, resource_id).await? {
            return Ok(requested.to_vec());
        }
        let member: Option<Member> =
            self.meta.get_object(&keys::app_member(resource_id, uid)).await?;
        Ok(member.map(|m| Self::member_grants(&m, requested)).unwrap_or_default())
    }
}

/// Resolver for containers: a role on the member record.
#[derive(Debug, Clone)]
pub struct RoleBasedResolver {
    meta: MetadataStore,
}

impl RoleBasedResolver {
    /// Creates a resolver reading through `meta`.
    pub fn new(meta: MetadataStore) -> Self {
        Self { meta }
    }

    /// Grants of a container member record.
    pub fn member_grants(member: &Member, requested: &[Capability]) -> Vec<Capability> {
        match member.role {
            Some(role) => {
                let grants = role_grants(role);
                intersect(requested, |c| grants.contains(&c))
            },
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl CapabilityResolver for RoleBasedResolver {
    #[tracing::instrument(skip(self))]
    async fn resolve(
        &self,
        uid: &str,
        resource_id: &str,
        requested: &[Capability],
    ) -> Result<Vec<Capability>> {
        if owns(&self.meta, uid, ResourceKind::Container, resource_id).await? {
            return Ok(requested.to_vec());
        }
        let member: Option<Member> =
            self.meta.get_object(&keys::container_member(resource_id, uid)).await?;
        Ok(member.map(|m| Self::member_grants(&m, requested)).unwrap_or_default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use appstore_storage::{CasRetryConfig, MemoryBackend};
    use rstest::rstest;

    use super::{
        Capability::{Dev, Own, Read, Write},
        *,
    };
    use crate::model::Ownership;

    fn member(role: Option<Role>, allow: Option<&str>) -> Member {
        Member { id: "u2".into(), role, allow: allow.map(Into::into), title: None }
    }

    #[rstest]
    #[case::dev_token(member(None, Some("dev")), vec![Dev, Own], vec![Dev])]
    #[case::own_token(member(None, Some("own")), vec![Own, Dev, Write], vec![Own, Dev, Write])]
    #[case::implied_read(member(None, Some("dev")), vec![Read, Write], vec![Read])]
    #[case::empty_allow_uses_role(
        member(Some(Role::ReadWrite), None),
        vec![Own, Write, Read],
        vec![Write, Read]
    )]
    #[case::owner_role(member(Some(Role::Owner), None), vec![Own, Dev], vec![Own, Dev])]
    #[case::unknown_tokens_ignored(member(None, Some("admin|dev")), vec![Own, Dev], vec![Dev])]
    #[case::order_preserved(member(None, Some("dev")), vec![Read, Dev], vec![Read, Dev])]
    fn token_grants(
        #[case] member: Member,
        #[case] requested: Vec<Capability>,
        #[case] expected: Vec<Capability>,
    ) {
        assert_eq!(TokenBasedResolver::member_grants(&member, &requested), expected);
    }

    #[rstest]
    #[case::owner(Some(Role::Owner), vec![Own, Write, Read], vec![Own, Write, Read])]
    #[case::read_write(Some(Role::ReadWrite), vec![Own, Write, Read], vec![Write, Read])]
    #[case::read_only(Some(Role::ReadOnly), vec![Write, Read], vec![Read])]
    #[case::no_role(None, vec![Read], vec![])]
    fn role_grants_table(
        #[case] role: Option<Role>,
        #[case] requested: Vec<Capability>,
        #[case] expected: Vec<Capability>,
    ) {
        assert_eq!(RoleBasedResolver::member_grants(&member(role, None), &requested), expected);
    }

    fn meta() -> MetadataStore {
        let backend = MemoryBackend::new();
        MetadataStore::new(
            Arc::new(backend.clone()),
            Arc::new(backend),
            "",
            Duration::from_secs(60),
            CasRetryConfig::default(),
        )
    }

    #[tokio::test]
    async fn ownership_overrides_member_tokens() {
        let meta = meta();
        meta.put_object(
            &keys::ownership("u1", ResourceKind::App, "a1"),
            &Ownership { kind: ResourceKind::App, id: "a1".into(), title: String::new() },
        )
        .await
        .unwrap();
        meta.put_object(&keys::app_member("a1", "u1"), &member(None, Some("dev"))).await.unwrap();

        let resolver = TokenBasedResolver::new(meta);
        let granted = resolver.resolve("u1", "a1", &Capability::ALL).await.unwrap();
        assert_eq!(granted, Capability::ALL);
    }

    #[tokio::test]
    async fn stranger_gets_nothing_and_require_denies() {
        let resolver = RoleBasedResolver::new(meta());
        assert!(resolver.resolve("u9", "c1", &[Read]).await.unwrap().is_empty());
        let err = require(&resolver, "u9", "c1", Read).await.unwrap_err();
        assert!(matches!(err, AppStoreError::PermissionDenied));
    }

    #[test]
    fn capability_tokens_parse() {
        for cap in Capability::ALL {
            assert_eq!(cap.as_str().parse::<Capability>().unwrap(), cap);
        }
        assert!("admin".parse::<Capability>().is_err());
    }
}
