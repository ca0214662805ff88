//! End-to-end flows through the public `AppStore` API.
//!
//! Every test builds a fresh in-memory store, logs users in through the
//! mailed login code and drives apps, members, versions and containers the
//! way a client would.
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

mod common;

use std::time::Duration;

use appstore_core::{Capability, ErrorKind, Page, Role, VersionStatus};
use common::{Harness, fast_config, fetch_request, info_request};
use serde_json::json;

// ---------------------------------------------------------------------------
// Scenario 1: owner grants a dev capability
// ---------------------------------------------------------------------------

#[tokio::test]
async fn owner_grants_dev_to_a_member() {
    let h = Harness::new();
    let t1 = h.login("u1@x.com").await;
    assert_eq!(h.uid(&t1).await, "u1");
    h.directory.insert("u2", "u2@x.com");

    let app = h.store.create_app(&t1, "Notes", Some(json!({"icon": "n.png"}))).await.unwrap();

    let owner = h.store.app_resolver().resolve("u1", &app.id, &Capability::ALL).await.unwrap();
    assert_eq!(owner, Capability::ALL);

    let member = h.store.add_app_member(&t1, &app.id, "u2@x.com", "dev", "").await.unwrap();
    assert_eq!(member.id, "u2");
    assert_eq!(member.allow.as_deref(), Some("dev"));

    let resolver = h.store.app_resolver();
    assert_eq!(resolver.resolve("u2", &app.id, &[Capability::Dev]).await.unwrap(), [Capability::Dev]);
    assert!(resolver.resolve("u2", &app.id, &[Capability::Own]).await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Scenario 2: a version is published once
// ---------------------------------------------------------------------------

#[tokio::test]
async fn version_is_published_once() {
    let h = Harness::new();
    let token = h.login("u1@x.com").await;
    let app = h.store.create_app(&token, "Notes", None).await.unwrap();

    let ticket = h.store.request_upload(&token, &app.id, "1.0.0", "cloud").await.unwrap();
    assert_eq!(ticket.method, "PUT");
    assert_eq!(ticket.key, format!("app/{}/1.0.0/cloud.zip", app.id));
    assert!(h.signer.verify_url(&ticket.url));

    // Nothing is written until the upload is finalized.
    h.store.request_upload(&token, &app.id, "1.0.0", "web").await.unwrap();

    let version = h
        .store
        .finalize_upload(&token, &app.id, "1.0.0", "first", json!({"cloud": {}}))
        .await
        .unwrap();
    assert_eq!(version.status, VersionStatus::Ok);

    let err = h.store.request_upload(&token, &app.id, "1.0.0", "cloud").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict, "got {err:?}");

    let err = h
        .store
        .finalize_upload(&token, &app.id, "1.0.0", "again", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict, "got {err:?}");

    let stored = h.store.get_version_info(&token, &app.id, "1.0.0").await.unwrap();
    assert_eq!(stored.title, "first");
}

// ---------------------------------------------------------------------------
// Scenario 3: signed fetch requires approval
// ---------------------------------------------------------------------------

#[tokio::test]
async fn signed_fetch_requires_approval() {
    let h = Harness::new();
    let token = h.login("u1@x.com").await;
    let app = h.store.create_app(&token, "Notes", None).await.unwrap();
    h.store
        .finalize_upload(&token, &app.id, "1.0.0", "", json!({"cloud": {"size": 10}}))
        .await
        .unwrap();
    let container = h.store.create_container(&token, None).await.unwrap();

    let request = fetch_request(&container, &app.id, "1.0.0", "cloud");
    let err = h.store.signed_fetch(&request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied, "got {err:?}");

    h.store.approve(&token, &app.id, &container.id).await.unwrap();

    let grant = h.store.signed_fetch(&request).await.unwrap();
    assert!(!grant.url.is_empty());
    assert!(grant.url.contains(&format!("app/{}/1.0.0/cloud.zip", app.id)));
    assert!(h.signer.verify_url(&grant.url));
    assert_eq!(grant.version.ver, "1.0.0");
}

// ---------------------------------------------------------------------------
// Scenario 4: login code resend cooldown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn login_code_resend_waits_for_cooldown() {
    let mut config = fast_config();
    config.session.code_resend_cooldown = Duration::from_millis(60);
    let h = Harness::with_config(config);

    h.store.issue_login_code("u1@x.com").await.unwrap();
    let err = h.store.issue_login_code("u1@x.com").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimited);

    tokio::time::sleep(Duration::from_millis(150)).await;

    h.store.issue_login_code("u1@x.com").await.unwrap();
    assert_eq!(h.mailer.sent().len(), 2);
}

// ---------------------------------------------------------------------------
// Signed delivery checks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn signed_fetch_checks_run_in_order() {
    let h = Harness::new();
    let token = h.login("u1@x.com").await;
    let app = h.store.create_app(&token, "Notes", None).await.unwrap();
    let container = h.store.create_container(&token, None).await.unwrap();
    h.store.approve(&token, &app.id, &container.id).await.unwrap();

    let mut tampered = fetch_request(&container, &app.id, "1.0.0", "cloud");
    tampered.ability = "web".into();
    assert_eq!(
        h.store.signed_fetch(&tampered).await.unwrap_err().kind(),
        ErrorKind::SignatureInvalid
    );

    let mut stale = fetch_request(&container, &app.id, "1.0.0", "cloud");
    stale.timestamp -= 3_600;
    stale.sign = appstore_authn::sign(&container.secret, &stale.fields());
    assert_eq!(
        h.store.signed_fetch(&stale).await.unwrap_err().kind(),
        ErrorKind::SignatureInvalid
    );

    // Approved and signed, but nothing published yet.
    let request = fetch_request(&container, &app.id, "1.0.0", "cloud");
    assert_eq!(h.store.signed_fetch(&request).await.unwrap_err().kind(), ErrorKind::NotFound);

    h.store.finalize_upload(&token, &app.id, "1.0.0", "", json!({"web": {}})).await.unwrap();
    assert_eq!(h.store.signed_fetch(&request).await.unwrap_err().kind(), ErrorKind::NotFound);

    let web = fetch_request(&container, &app.id, "1.0.0", "web");
    h.store.signed_fetch(&web).await.unwrap();
}

#[tokio::test]
async fn unapprove_revokes_delivery() {
    let h = Harness::new();
    let token = h.login("u1@x.com").await;
    let app = h.store.create_app(&token, "Notes", None).await.unwrap();
    h.store.finalize_upload(&token, &app.id, "2.1", "", json!({"cloud": {}})).await.unwrap();
    let container = h.store.create_container(&token, None).await.unwrap();

    let first = h.store.approve(&token, &app.id, &container.id).await.unwrap();
    let second = h.store.approve(&token, &app.id, &container.id).await.unwrap();
    assert_eq!(first, second);

    let request = fetch_request(&container, &app.id, "2.1", "cloud");
    h.store.signed_fetch(&request).await.unwrap();

    h.store.unapprove(&token, &app.id, &container.id).await.unwrap();
    h.store.unapprove(&token, &app.id, &container.id).await.unwrap();
    assert_eq!(
        h.store.signed_fetch(&request).await.unwrap_err().kind(),
        ErrorKind::PermissionDenied
    );
}

#[tokio::test]
async fn approval_needs_app_ownership_and_an_existing_container() {
    let h = Harness::new();
    let owner = h.login("u1@x.com").await;
    let dev = h.login("u2@x.com").await;
    let app = h.store.create_app(&owner, "Notes", None).await.unwrap();
    h.store.add_app_member(&owner, &app.id, "u2@x.com", "dev", "").await.unwrap();
    let container = h.store.create_container(&dev, None).await.unwrap();

    let err = h.store.approve(&dev, &app.id, &container.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    let err = h.store.approve(&owner, &app.id, "missing").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    h.store.approve(&owner, &app.id, &container.id).await.unwrap();
}

#[tokio::test]
async fn unknown_container_is_indistinguishable_from_a_bad_signature() {
    let h = Harness::new();
    let token = h.login("u1@x.com").await;
    let app = h.store.create_app(&token, "Notes", None).await.unwrap();
    let container = h.store.create_container(&token, None).await.unwrap();

    let mut forged = container.clone();
    forged.id = "missing".into();
    let fetch = fetch_request(&forged, &app.id, "1.0.0", "cloud");
    assert_eq!(h.store.signed_fetch(&fetch).await.unwrap_err().kind(), ErrorKind::SignatureInvalid);
    let poll = info_request(&forged, 0);
    assert_eq!(h.store.container_info(&poll).await.unwrap_err().kind(), ErrorKind::SignatureInvalid);

    let mut wrong_secret = container.clone();
    wrong_secret.secret = "not-the-secret".into();
    let fetch = fetch_request(&wrong_secret, &app.id, "1.0.0", "cloud");
    assert_eq!(h.store.signed_fetch(&fetch).await.unwrap_err().kind(), ErrorKind::SignatureInvalid);
}

// ---------------------------------------------------------------------------
// App members and versions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn member_management_is_owner_only() {
    let h = Harness::new();
    let owner = h.login("u1@x.com").await;
    let dev = h.login("u2@x.com").await;
    h.directory.insert("u3", "u3@x.com");
    let app = h.store.create_app(&owner, "Notes", None).await.unwrap();

    h.store.add_app_member(&owner, &app.id, "u2@x.com", "dev", "Dev").await.unwrap();

    let err = h.store.add_app_member(&dev, &app.id, "u3@x.com", "dev", "").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    let err = h.store.list_app_members(&dev, &app.id, Page::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    let err = h.store.add_app_member(&owner, &app.id, "u3@x.com", "write", "").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    let err =
        h.store.add_app_member(&owner, &app.id, "nobody@x.com", "dev", "").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = h.store.add_app_member(&owner, &app.id, "not-an-email", "dev", "").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn member_upsert_keeps_unset_fields() {
    let h = Harness::new();
    let owner = h.login("u1@x.com").await;
    h.directory.insert("u2", "u2@x.com");
    let app = h.store.create_app(&owner, "Notes", None).await.unwrap();

    h.store.add_app_member(&owner, &app.id, "u2@x.com", "dev", "Dev").await.unwrap();
    let updated = h.store.add_app_member(&owner, &app.id, "u2@x.com", "", "Lead").await.unwrap();
    assert_eq!(updated.allow.as_deref(), Some("dev"));
    assert_eq!(updated.title.as_deref(), Some("Lead"));

    let me = h.store.add_app_member(&owner, &app.id, "u1@x.com", "dev", "ignored").await.unwrap();
    assert!(me.is_owner());
    assert_eq!(me.title, None);

    let listed = h.store.list_app_members(&owner, &app.id, Page::new(1, 10)).await.unwrap();
    let page = listed.page.unwrap();
    assert_eq!((page.total_count, page.count), (2, 1));
    let emails: Vec<_> = listed.items.iter().map(|m| m.email.clone().unwrap()).collect();
    assert_eq!(emails, ["u1@x.com", "u2@x.com"]);
}

#[tokio::test]
async fn removed_member_loses_access() {
    let h = Harness::new();
    let owner = h.login("u1@x.com").await;
    let dev = h.login("u2@x.com").await;
    let app = h.store.create_app(&owner, "Notes", None).await.unwrap();
    h.store.add_app_member(&owner, &app.id, "u2@x.com", "dev", "").await.unwrap();

    h.store.request_upload(&dev, &app.id, "1.0", "cloud").await.unwrap();

    let removed = h.store.remove_app_member(&owner, &app.id, "u2@x.com").await.unwrap();
    assert_eq!(removed.allow.as_deref(), Some("dev"));

    let err = h.store.request_upload(&dev, &app.id, "1.0", "cloud").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    let err = h.store.remove_app_member(&owner, &app.id, "u2@x.com").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn plain_members_can_read_but_not_upload() {
    let h = Harness::new();
    let owner = h.login("u1@x.com").await;
    let viewer = h.login("u2@x.com").await;
    let stranger = h.login("u3@x.com").await;
    let app = h.store.create_app(&owner, "Notes", None).await.unwrap();
    h.store.finalize_upload(&owner, &app.id, "1.0", "", json!({})).await.unwrap();
    h.store.add_app_member(&owner, &app.id, "u2@x.com", "", "Viewer").await.unwrap();

    assert_eq!(h.store.get_app(&viewer, &app.id).await.unwrap().title, "Notes");
    h.store.get_version_info(&viewer, &app.id, "1.0").await.unwrap();
    let err = h.store.request_upload(&viewer, &app.id, "1.1", "cloud").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    let err = h.store.get_app(&stranger, &app.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[tokio::test]
async fn upload_input_is_validated() {
    let h = Harness::new();
    let token = h.login("u1@x.com").await;
    let app = h.store.create_app(&token, "Notes", None).await.unwrap();

    for (ver, ability) in [("1", "cloud"), ("1.0.0-rc", "cloud"), ("1.0", "cloud/../x"), ("1.0", "")] {
        let err = h.store.request_upload(&token, &app.id, ver, ability).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput, "{ver} {ability}");
    }
    let err = h.store.create_app(&token, "", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn version_queries_see_only_published_rows() {
    let h = Harness::new();
    let token = h.login("u1@x.com").await;
    let app = h.store.create_app(&token, "Notes", None).await.unwrap();

    let err = h.store.get_version_info(&token, &app.id, "1.0").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    for ver in ["1.0", "1.1", "2.0"] {
        h.store.finalize_upload(&token, &app.id, ver, ver, json!({})).await.unwrap();
    }

    let page = h.store.list_versions(&token, &app.id, Page::new(2, 2)).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].ver, "2.0");
    let info = page.page.unwrap();
    assert_eq!((info.total_count, info.count), (3, 2));

    let all = h.store.list_versions(&token, &app.id, Page::default()).await.unwrap();
    assert!(all.page.is_none());
    assert_eq!(all.items.len(), 3);
}

#[tokio::test]
async fn my_apps_lists_owned_apps_only() {
    let h = Harness::new();
    let t1 = h.login("u1@x.com").await;
    let t2 = h.login("u2@x.com").await;
    let a = h.store.create_app(&t1, "A", None).await.unwrap();
    let b = h.store.create_app(&t1, "B", None).await.unwrap();
    let c = h.store.create_app(&t2, "C", None).await.unwrap();
    h.store.add_app_member(&t2, &c.id, "u1@x.com", "dev", "").await.unwrap();

    let mine = h.store.list_my_apps(&t1, Page::default()).await.unwrap();
    let mut ids: Vec<_> = mine.items.into_iter().map(|app| app.id).collect();
    ids.sort();
    let mut expected = vec![a.id, b.id];
    expected.sort();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn operations_require_a_session() {
    let h = Harness::new();
    let err = h.store.create_app("bogus", "Notes", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotLoggedIn);
    let err = h.store.create_container("", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

// ---------------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn container_poll_returns_info_only_when_newer() {
    let h = Harness::new();
    let token = h.login("u1@x.com").await;
    let container = h.store.create_container(&token, Some(json!({"env": "prod"}))).await.unwrap();
    assert_eq!(container.ver, 1);

    let current = h.store.container_info(&info_request(&container, 1)).await.unwrap();
    assert_eq!(current.ver, 1);
    assert!(current.info.is_none());

    let fresh = h.store.container_info(&info_request(&container, 0)).await.unwrap();
    assert_eq!(fresh.info, Some(json!({"env": "prod"})));

    let updated = h
        .store
        .update_container(&token, &container.id, Some(json!({"env": "staging"})), false)
        .await
        .unwrap();
    assert_eq!(updated.ver, 2);

    let polled = h.store.container_info(&info_request(&container, 1)).await.unwrap();
    assert_eq!(polled.ver, 2);
    assert_eq!(polled.info, Some(json!({"env": "staging"})));
}

#[tokio::test]
async fn rotated_secret_invalidates_old_signatures() {
    let h = Harness::new();
    let token = h.login("u1@x.com").await;
    let container = h.store.create_container(&token, None).await.unwrap();

    let rotated = h.store.update_container(&token, &container.id, None, true).await.unwrap();
    assert_ne!(rotated.secret, container.secret);

    let err = h.store.container_info(&info_request(&container, 0)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SignatureInvalid);
    h.store.container_info(&info_request(&rotated, 0)).await.unwrap();
}

#[tokio::test]
async fn container_roles_gate_reads_and_writes() {
    let h = Harness::new();
    let owner = h.login("u1@x.com").await;
    let reader = h.login("u2@x.com").await;
    let writer = h.login("u3@x.com").await;
    let container = h.store.create_container(&owner, None).await.unwrap();

    let err = h
        .store
        .add_container_member(&owner, &container.id, "u2@x.com", Role::Owner)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    h.store.add_container_member(&owner, &container.id, "u2@x.com", Role::ReadOnly).await.unwrap();
    h.store.add_container_member(&owner, &container.id, "u3@x.com", Role::ReadWrite).await.unwrap();

    assert_eq!(h.store.get_container(&reader, &container.id).await.unwrap().id, container.id);
    let err = h.store.update_container(&reader, &container.id, None, false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    let updated = h.store.update_container(&writer, &container.id, None, false).await.unwrap();
    assert_eq!(updated.ver, 2);

    let err = h
        .store
        .add_container_member(&writer, &container.id, "u2@x.com", Role::ReadWrite)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    let removed =
        h.store.remove_container_member(&owner, &container.id, "u3@x.com").await.unwrap();
    assert_eq!(removed.role, Some(Role::ReadWrite));
    let err = h.store.update_container(&writer, &container.id, None, false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[tokio::test]
async fn my_containers_lists_owned_containers() {
    let h = Harness::new();
    let token = h.login("u1@x.com").await;
    let first = h.store.create_container(&token, None).await.unwrap();
    let second = h.store.create_container(&token, None).await.unwrap();

    let listed = h.store.list_my_containers(&token, Page::new(1, 1)).await.unwrap();
    assert_eq!(listed.items.len(), 1);
    assert_eq!(listed.page.unwrap().total_count, 2);

    let all = h.store.list_my_containers(&token, Page::default()).await.unwrap();
    let mut ids: Vec<_> = all.items.into_iter().map(|c| c.id).collect();
    ids.sort();
    let mut expected = vec![first.id, second.id];
    expected.sort();
    assert_eq!(ids, expected);
}
