//! Tests for the in-memory service: access semantics, sharing repair,
//! subscription checks, transaction enforcement.

use pretty_assertions::assert_eq;
use calvault_model::{Collection, CollectionKind, Event};
use calvault_store::{FixShareeResult, Identity, MemCal, SubscriptionCheck, SvcError, SvcFactory};
use calvault_types::{CollectionPath, DesiredAccess, OwnerId, Privilege};

fn owner(name: &str) -> OwnerId {
    OwnerId::new(name)
}

fn path(p: &str) -> CollectionPath {
    CollectionPath::new(p)
}

async fn seeded() -> MemCal {
    let cal = MemCal::new();
    let svc = cal
        .open_session(Identity::admin(owner("root")))
        .await
        .unwrap();
    svc.begin_transaction().await.unwrap();
    svc.put_collection(
        Collection::calendar(path("/user/rachel/work"), owner("rachel")),
        false,
    )
    .await
    .unwrap();
    svc.end_transaction().await.unwrap();
    cal
}

#[tokio::test]
async fn mutations_require_transaction() {
    let cal = MemCal::new();
    let svc = cal
        .open_session(Identity::admin(owner("root")))
        .await
        .unwrap();
    let result = svc
        .put_collection(
            Collection::calendar(path("/user/a/cal"), owner("a")),
            false,
        )
        .await;
    assert!(matches!(result, Err(SvcError::NoTransaction)));
}

#[tokio::test]
async fn duplicate_collection_rejected_unless_merge() {
    let cal = seeded().await;
    let svc = cal
        .open_session(Identity::admin(owner("root")))
        .await
        .unwrap();
    svc.begin_transaction().await.unwrap();

    let dup = Collection::calendar(path("/user/rachel/work"), owner("rachel"));
    let result = svc.put_collection(dup.clone(), false).await;
    assert!(matches!(result, Err(SvcError::Duplicate(_))));

    svc.put_collection(dup, true).await.unwrap();
    svc.end_transaction().await.unwrap();
}

#[tokio::test]
async fn get_collection_denied_without_grant() {
    let cal = seeded().await;
    let svc = cal
        .open_session(Identity::user(owner("sam")))
        .await
        .unwrap();
    let result = svc.get_collection(&path("/user/rachel/work")).await;
    assert!(matches!(result, Err(SvcError::AccessDenied(_))));
}

#[tokio::test]
async fn get_collection_visible_with_grant() {
    let cal = seeded().await;
    cal.grant(path("/user/rachel/work"), owner("sam"), true, false)
        .await;
    let svc = cal
        .open_session(Identity::user(owner("sam")))
        .await
        .unwrap();
    let col = svc
        .get_collection(&path("/user/rachel/work"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(col.owner, owner("rachel"));
}

#[tokio::test]
async fn check_access_reflects_grants() {
    let cal = seeded().await;
    cal.grant(path("/user/rachel/work"), owner("sam"), true, false)
        .await;
    let col = cal.collection(&path("/user/rachel/work")).await.unwrap();
    let svc = cal
        .open_session(Identity::user(owner("sam")))
        .await
        .unwrap();
    assert!(svc.check_access(&col, Privilege::Read, true).await.unwrap());
    assert!(!svc.check_access(&col, Privilege::Write, true).await.unwrap());
}

#[tokio::test]
async fn public_collection_readable_by_anyone() {
    let cal = MemCal::new();
    let svc = cal
        .open_session(Identity::admin(owner("root")))
        .await
        .unwrap();
    svc.begin_transaction().await.unwrap();
    let mut col = Collection::calendar(path("/public/events"), owner("public-user"));
    col.public = true;
    svc.put_collection(col.clone(), false).await.unwrap();
    svc.end_transaction().await.unwrap();

    let sam = cal
        .open_session(Identity::user(owner("sam")))
        .await
        .unwrap();
    assert!(sam.check_access(&col, Privilege::Read, true).await.unwrap());
    assert!(!sam.check_access(&col, Privilege::Write, true).await.unwrap());
}

#[tokio::test]
async fn fix_sharee_is_idempotent() {
    let cal = seeded().await;
    let target = cal.collection(&path("/user/rachel/work")).await.unwrap();
    let svc = cal
        .open_session(Identity::user(owner("rachel")))
        .await
        .unwrap();
    svc.begin_transaction().await.unwrap();

    let first = svc
        .fix_sharee(&target, &owner("sam"), DesiredAccess::ReadOnly)
        .await
        .unwrap();
    assert_eq!(first, FixShareeResult::Reshared);

    let second = svc
        .fix_sharee(&target, &owner("sam"), DesiredAccess::ReadOnly)
        .await
        .unwrap();
    assert_eq!(second, FixShareeResult::Ok);

    assert_eq!(cal.mutations().await, 1);
    svc.end_transaction().await.unwrap();
}

#[tokio::test]
async fn fix_sharee_detects_alias_cycle() {
    let cal = MemCal::new();
    let svc = cal
        .open_session(Identity::admin(owner("root")))
        .await
        .unwrap();
    svc.begin_transaction().await.unwrap();
    svc.put_collection(
        Collection::alias(path("/user/a/link"), owner("a"), path("/user/b/link")),
        false,
    )
    .await
    .unwrap();
    svc.put_collection(
        Collection::alias(path("/user/b/link"), owner("b"), path("/user/a/link")),
        false,
    )
    .await
    .unwrap();

    let target = cal.collection(&path("/user/b/link")).await.unwrap();
    let before = cal.mutations().await;
    let result = svc
        .fix_sharee(&target, &owner("a"), DesiredAccess::ReadOnly)
        .await
        .unwrap();
    assert_eq!(result, FixShareeResult::Circular);
    // the cycle check must not mutate sharing state
    assert_eq!(cal.mutations().await, before);
    svc.end_transaction().await.unwrap();
}

#[tokio::test]
async fn fix_sharee_broken_when_alias_target_gone() {
    let cal = MemCal::new();
    let svc = cal
        .open_session(Identity::admin(owner("root")))
        .await
        .unwrap();
    svc.begin_transaction().await.unwrap();
    svc.put_collection(
        Collection::alias(path("/user/a/link"), owner("a"), path("/user/gone/cal")),
        false,
    )
    .await
    .unwrap();

    let target = cal.collection(&path("/user/a/link")).await.unwrap();
    let result = svc
        .fix_sharee(&target, &owner("b"), DesiredAccess::ReadOnly)
        .await
        .unwrap();
    assert_eq!(result, FixShareeResult::Broken);
    svc.end_transaction().await.unwrap();
}

#[tokio::test]
async fn check_subscription_classifies() {
    let cal = MemCal::new();
    let svc = cal
        .open_session(Identity::admin(owner("root")))
        .await
        .unwrap();
    svc.begin_transaction().await.unwrap();
    let mut sub = Collection::calendar(path("/user/a/feed"), owner("a"));
    sub.kind = CollectionKind::ExternalSub {
        target: "https://feeds.example.com/holidays".to_string(),
    };
    svc.put_collection(sub, false).await.unwrap();
    svc.put_collection(
        Collection::calendar(path("/user/a/plain"), owner("a")),
        false,
    )
    .await
    .unwrap();
    svc.end_transaction().await.unwrap();

    assert_eq!(
        svc.check_subscription(&path("/user/a/feed")).await.unwrap(),
        SubscriptionCheck::Ok
    );
    assert_eq!(
        svc.check_subscription(&path("/user/a/plain")).await.unwrap(),
        SubscriptionCheck::NotExternal
    );
    assert_eq!(
        svc.check_subscription(&path("/user/a/missing")).await.unwrap(),
        SubscriptionCheck::NotFound
    );

    cal.set_synch_available(false).await;
    assert_eq!(
        svc.check_subscription(&path("/user/a/feed")).await.unwrap(),
        SubscriptionCheck::NoSynchService
    );
}

#[tokio::test]
async fn event_hrefs_enumeration_is_stable() {
    let cal = seeded().await;
    let svc = cal
        .open_session(Identity::admin(owner("root")))
        .await
        .unwrap();
    svc.begin_transaction().await.unwrap();
    for uid in ["b", "a", "c"] {
        svc.put_event(
            &path("/user/rachel/work"),
            Event {
                uid: uid.to_string(),
                owner: owner("rachel"),
                ..Default::default()
            },
            false,
        )
        .await
        .unwrap();
    }
    svc.end_transaction().await.unwrap();

    let all = svc.event_hrefs(0, 10).await.unwrap();
    assert_eq!(
        all,
        vec![
            "/user/rachel/work/a",
            "/user/rachel/work/b",
            "/user/rachel/work/c"
        ]
    );
    let tail = svc.event_hrefs(1, 1).await.unwrap();
    assert_eq!(tail, vec!["/user/rachel/work/b"]);
}
