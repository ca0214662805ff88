//! Entity and request/response types.
//!
//! Entities are stored as JSON documents. Schema-free attachments (`info`)
//! are carried as [`serde_json::Value`] and passed through unmodified.

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppStoreError;

/// Default page size.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Largest accepted page size.
pub const MAX_PAGE_SIZE: u32 = 1_000;

/// A publishable application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    /// App id.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Opaque attachment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A deployment target allowed to fetch approved artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    /// Container id.
    pub id: String,
    /// Shared secret used to sign container requests.
    pub secret: String,
    /// Revision counter, starting at 1 and bumped on every update.
    pub ver: u64,
    /// Opaque attachment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
}

/// Role of a member on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Full control; exactly one per resource.
    Owner,
    /// May read and modify.
    ReadWrite,
    /// May read.
    ReadOnly,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Owner => f.write_str("OWNER"),
            Role::ReadWrite => f.write_str("READ_WRITE"),
            Role::ReadOnly => f.write_str("READ_ONLY"),
        }
    }
}

impl FromStr for Role {
    type Err = AppStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OWNER" => Ok(Role::Owner),
            "READ_WRITE" => Ok(Role::ReadWrite),
            "READ_ONLY" => Ok(Role::ReadOnly),
            other => Err(AppStoreError::invalid("role", format!("unknown role {other}"))),
        }
    }
}

/// A membership record.
///
/// App members carry capability tokens in `allow` (`|`-separated); container
/// members carry a `role`. The app OWNER carries both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Member uid.
    pub id: String,
    /// Role, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// `|`-separated capability tokens, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow: Option<String>,
    /// Display name chosen by the resource owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Member {
    /// The OWNER member record for `uid`.
    #[must_use]
    pub fn owner(uid: impl Into<String>) -> Self {
        Self { id: uid.into(), role: Some(Role::Owner), allow: None, title: None }
    }

    /// Returns `true` if this is the OWNER record.
    pub fn is_owner(&self) -> bool {
        self.role == Some(Role::Owner)
    }

    /// Iterates the non-empty tokens of `allow`.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.allow.as_deref().unwrap_or_default().split('|').filter(|t| !t.is_empty())
    }
}

/// A member together with the email the directory knows for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberView {
    /// The stored record.
    #[serde(flatten)]
    pub member: Member,
    /// Email, when the directory still knows the uid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Publication state of a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VersionStatus {
    /// Reserved but not published.
    None,
    /// Published.
    Ok,
}

/// One version of an app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppVersion {
    /// App id.
    pub appid: String,
    /// Version string.
    pub ver: String,
    /// Release notes or display title.
    pub title: String,
    /// Publication state.
    pub status: VersionStatus,
    /// Opaque attachment; its top-level keys name the abilities shipped.
    #[serde(default)]
    pub info: Value,
    /// Publication time.
    pub published_at: DateTime<Utc>,
}

impl AppVersion {
    /// Returns `true` if the version is published.
    pub fn is_published(&self) -> bool {
        self.status == VersionStatus::Ok
    }

    /// Returns `true` if `ability` is a key of the info object.
    pub fn has_ability(&self, ability: &str) -> bool {
        self.info.as_object().is_some_and(|info| info.contains_key(ability))
    }
}

/// Kind of an owned resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// An app.
    App,
    /// A container.
    Container,
}

impl ResourceKind {
    /// Path segment for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::App => "app",
            ResourceKind::Container => "container",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direct ownership of a resource by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resource id.
    pub id: String,
    /// Denormalized title for listings.
    #[serde(default)]
    pub title: String,
}

/// Existence marker for a container's approval to fetch an app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    /// Who approved it.
    pub approved_by: String,
    /// When.
    pub approved_at: DateTime<Utc>,
}

/// Pagination request.
///
/// `p` is 1-based; `p == 0` returns the first page without page metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Page {
    /// Page number.
    #[serde(default)]
    pub p: u32,
    /// Page size; zero means [`DEFAULT_PAGE_SIZE`].
    #[serde(default)]
    pub n: u32,
}

impl Page {
    /// Page `p` of size `n`.
    #[must_use]
    pub fn new(p: u32, n: u32) -> Self {
        Self { p, n }
    }

    fn size(self) -> usize {
        match self.n {
            0 => DEFAULT_PAGE_SIZE as usize,
            n => n.min(MAX_PAGE_SIZE) as usize,
        }
    }

    /// Slices `items` according to this request.
    pub fn apply<T>(self, items: Vec<T>) -> Paged<T> {
        let n = self.size();
        let total = items.len();
        let skip = (self.p.saturating_sub(1) as usize).saturating_mul(n);
        let window: Vec<T> = items.into_iter().skip(skip).take(n).collect();

        let page = (self.p > 0).then(|| PageInfo {
            p: self.p,
            n: n as u32,
            total_count: total as u64,
            count: total.div_ceil(n) as u64,
        });
        Paged { page, items: window }
    }
}

/// Pagination metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    /// Page number.
    pub p: u32,
    /// Page size.
    pub n: u32,
    /// Total items across all pages.
    pub total_count: u64,
    /// Number of pages.
    pub count: u64,
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paged<T> {
    /// Present when a page number was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<PageInfo>,
    /// Items on this page.
    pub items: Vec<T>,
}

/// Everything a client needs to upload one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTicket {
    /// Signed upload URL.
    pub url: String,
    /// HTTP method to use.
    pub method: String,
    /// Extra form fields to send with the upload.
    pub fields: BTreeMap<String, String>,
    /// Object key the artifact lands at.
    pub key: String,
}

/// A container's signed request for an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedFetchRequest {
    /// Container id.
    pub id: String,
    /// App id.
    pub appid: String,
    /// Version string.
    pub ver: String,
    /// Artifact ability.
    pub ability: String,
    /// Unix seconds at signing time.
    pub timestamp: i64,
    /// Hex signature over the other fields.
    pub sign: String,
}

impl SignedFetchRequest {
    /// The signed fields, keyed by name.
    pub fn fields(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("ability", self.ability.clone()),
            ("appid", self.appid.clone()),
            ("id", self.id.clone()),
            ("timestamp", self.timestamp.to_string()),
            ("ver", self.ver.clone()),
        ])
    }
}

/// Result of a successful signed fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchGrant {
    /// Signed download URL.
    pub url: String,
    /// The version being fetched.
    pub version: AppVersion,
}

/// A container's signed poll for its own configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfoRequest {
    /// Container id.
    pub id: String,
    /// Unix seconds at signing time.
    pub timestamp: i64,
    /// Revision the client already holds.
    pub ver: u64,
    /// Hex signature over the other fields.
    pub sign: String,
}

impl ContainerInfoRequest {
    /// The signed fields, keyed by name.
    pub fn fields(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("id", self.id.clone()),
            ("timestamp", self.timestamp.to_string()),
            ("ver", self.ver.to_string()),
        ])
    }
}

/// Response to a [`ContainerInfoRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Current revision.
    pub ver: u64,
    /// Current attachment, only when the client's revision is older.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case::first_page(Page::new(1, 2), vec![0, 1], Some((5, 3)))]
    #[case::last_partial(Page::new(3, 2), vec![4], Some((5, 3)))]
    #[case::past_end(Page::new(9, 2), vec![], Some((5, 3)))]
    #[case::unpaged(Page::new(0, 2), vec![0, 1], None)]
    #[case::default_size(Page::default(), vec![0, 1, 2, 3, 4], None)]
    fn page_slicing(
        #[case] page: Page,
        #[case] expected: Vec<i32>,
        #[case] info: Option<(u64, u64)>,
    ) {
        let paged = page.apply((0..5).collect::<Vec<i32>>());
        assert_eq!(paged.items, expected);
        assert_eq!(paged.page.map(|p| (p.total_count, p.count)), info);
    }

    #[test]
    fn role_round_trips_as_screaming_snake() {
        let json = serde_json::to_string(&Role::ReadWrite).unwrap();
        assert_eq!(json, r#""READ_WRITE""#);
        assert_eq!("READ_ONLY".parse::<Role>().unwrap(), Role::ReadOnly);
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn member_tokens_skip_empty_segments() {
        let member = Member {
            id: "u2".into(),
            role: None,
            allow: Some("dev||own|".into()),
            title: None,
        };
        assert_eq!(member.tokens().collect::<Vec<_>>(), ["dev", "own"]);
        assert_eq!(Member::owner("u1").tokens().count(), 0);
    }

    #[test]
    fn ability_lookup_reads_info_keys() {
        let version = AppVersion {
            appid: "a1".into(),
            ver: "1.0.0".into(),
            title: String::new(),
            status: VersionStatus::Ok,
            info: json!({"cloud": {"size": 1}}),
            published_at: Utc::now(),
        };
        assert!(version.has_ability("cloud"));
        assert!(!version.has_ability("web"));
    }

    #[test]
    fn signed_fields_are_complete() {
        let request = SignedFetchRequest {
            id: "c1".into(),
            appid: "a1".into(),
            ver: "1.0.0".into(),
            ability: "cloud".into(),
            timestamp: 7,
            sign: "ignored".into(),
        };
        let keys: Vec<_> = request.fields().into_keys().collect();
        assert_eq!(keys, ["ability", "appid", "id", "timestamp", "ver"]);
    }
}
