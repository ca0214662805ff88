//! Deterministic metadata paths and object keys.
//!
//! ```text
//! app/{id}/info.json                 App
//! app/{id}/member/{uid}              App member
//! app/{id}/ver/{ver}                 App version
//! app/{id}/approve/{container_id}    Approval edge
//! container/{id}/meta.json           Container
//! container/{id}/member/{uid}        Container member
//! user/{uid}/own/{kind}/{id}         Ownership record
//! ```

use crate::model::ResourceKind;

/// Path of an app record.
pub fn app(id: &str) -> String {
    format!("app/{id}/info.json")
}

/// Prefix of every member record of an app.
pub fn app_members(id: &str) -> String {
    format!("app/{id}/member/")
}

/// Path of an app member record.
pub fn app_member(id: &str, uid: &str) -> String {
    format!("app/{id}/member/{uid}")
}

/// Prefix of every version record of an app.
pub fn app_versions(id: &str) -> String {
    format!("app/{id}/ver/")
}

/// Path of an app version record.
pub fn app_version(id: &str, ver: &str) -> String {
    format!("app/{id}/ver/{ver}")
}

/// Path of an approval edge.
pub fn approval(appid: &str, container_id: &str) -> String {
    format!("app/{appid}/approve/{container_id}")
}

/// Path of a container record.
pub fn container(id: &str) -> String {
    format!("container/{id}/meta.json")
}

/// Path of a container member record.
pub fn container_member(id: &str, uid: &str) -> String {
    format!("container/{id}/member/{uid}")
}

/// Prefix of every ownership record of `uid` for resources of `kind`.
pub fn owned(uid: &str, kind: ResourceKind) -> String {
    format!("user/{uid}/own/{kind}/")
}

/// Path of an ownership record.
pub fn ownership(uid: &str, kind: ResourceKind, id: &str) -> String {
    format!("user/{uid}/own/{kind}/{id}")
}

/// Object storage key of an artifact.
pub fn artifact(appid: &str, ver: &str, ability: &str) -> String {
    format!("app/{appid}/{ver}/{ability}.zip")
}
