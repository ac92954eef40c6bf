//! Tests for the restore engine: streaming reconstruction, strict/lenient
//! policy, version gating, forward references, merge and dry-run modes.

use pretty_assertions::assert_eq;
use calvault_restore::{
    load_alias_info, Mode, RestoreConfig, RestoreError, RestoreOutcome, RestoreScope, Restorer,
};
use calvault_store::{MemCal, SvcFactory};
use calvault_types::{CollectionPath, NullListener, OwnerId};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

fn dump_file(version: (u32, u32), body: &str) -> NamedTempFile {
    let mut f = NamedTempFile::new().expect("temp file");
    write!(
        f,
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <calendar-dump major-version=\"{}\" minor-version=\"{}\" \
         dumped-at=\"2026-08-01T00:00:00Z\">{}</calendar-dump>",
        version.0, version.1, body
    )
    .expect("write stream");
    f.flush().expect("flush");
    f
}

async fn restore(
    cal: &MemCal,
    config: RestoreConfig,
    version: (u32, u32),
    body: &str,
) -> Result<RestoreOutcome, RestoreError> {
    let file = dump_file(version, body);
    let restorer = Restorer::new(Arc::new(cal.clone()), config);
    let run = restorer.open(file.path())?;
    run.run(&NullListener).await
}

const SMALL_DATASET: &str = "\
<categories>\
  <category><uid>cat-1</uid><owner>rachel</owner><word>standup</word></category>\
</categories>\
<locations>\
  <location><uid>loc-1</uid><owner>rachel</owner><address>Main Hall</address><key>MH-1</key></location>\
</locations>\
<contacts>\
  <contact><uid>con-1</uid><owner>rachel</owner><name>Facilities</name></contact>\
</contacts>\
<collections>\
  <collection>\
    <path>/user/rachel/work</path><owner>rachel</owner>\
    <event><uid>ev-1</uid><owner>rachel</owner><summary>Standup</summary>\
      <start>20260302T090000Z</start><end>20260302T091500Z</end></event>\
  </collection>\
</collections>";

#[tokio::test]
async fn restores_small_dataset() {
    let cal = MemCal::new();
    let outcome = restore(&cal, RestoreConfig::default(), (1, 1), SMALL_DATASET)
        .await
        .unwrap();

    assert_eq!(outcome.counts.categories, 1);
    assert_eq!(outcome.counts.locations, 1);
    assert_eq!(outcome.counts.contacts, 1);
    assert_eq!(outcome.counts.collections, 1);
    assert_eq!(outcome.counts.events, 1);
    assert_eq!(outcome.counts.failures, 0);

    let col = cal
        .collection(&CollectionPath::new("/user/rachel/work"))
        .await
        .unwrap();
    assert_eq!(col.owner, OwnerId::new("rachel"));
    let ev = cal.event("/user/rachel/work/ev-1").await.unwrap();
    assert_eq!(ev.summary, "Standup");
}

#[tokio::test]
async fn override_after_master_is_attached() {
    let cal = MemCal::new();
    let body = "\
<collections><collection>\
  <path>/user/rachel/work</path><owner>rachel</owner>\
  <event><uid>ev-1</uid><owner>rachel</owner><summary>Series</summary></event>\
  <event><uid>ev-1</uid><owner>rachel</owner><recurrence-id>20260309T090000Z</recurrence-id>\
    <summary>Moved</summary></event>\
</collection></collections>";
    let outcome = restore(&cal, RestoreConfig::default(), (1, 1), body)
        .await
        .unwrap();

    assert_eq!(outcome.counts.events, 1);
    assert_eq!(outcome.counts.overrides, 1);
    assert_eq!(outcome.counts.unresolved, 0);

    let ev = cal.event("/user/rachel/work/ev-1").await.unwrap();
    assert_eq!(ev.overrides.len(), 1);
    assert_eq!(
        ev.overrides[0].recurrence_id.as_deref(),
        Some("20260309T090000Z")
    );
}

#[tokio::test]
async fn override_before_master_resolves_identically() {
    let cal = MemCal::new();
    let body = "\
<collections><collection>\
  <path>/user/rachel/work</path><owner>rachel</owner>\
  <event><uid>ev-1</uid><owner>rachel</owner><recurrence-id>20260309T090000Z</recurrence-id>\
    <summary>Moved</summary></event>\
  <event><uid>ev-1</uid><owner>rachel</owner><summary>Series</summary></event>\
</collection></collections>";
    let outcome = restore(&cal, RestoreConfig::default(), (1, 1), body)
        .await
        .unwrap();

    assert_eq!(outcome.counts.overrides, 1);
    assert_eq!(outcome.counts.unresolved, 0);
    let ev = cal.event("/user/rachel/work/ev-1").await.unwrap();
    assert_eq!(ev.summary, "Series");
    assert_eq!(ev.overrides.len(), 1);
}

#[tokio::test]
async fn orphan_override_is_flagged_unresolved() {
    let cal = MemCal::new();
    let body = "\
<collections><collection>\
  <path>/user/rachel/work</path><owner>rachel</owner>\
  <event><uid>ghost</uid><owner>rachel</owner><recurrence-id>20260309T090000Z</recurrence-id></event>\
</collection></collections>";
    let outcome = restore(&cal, RestoreConfig::default(), (1, 1), body)
        .await
        .unwrap();

    assert_eq!(outcome.counts.unresolved, 1);
    // the orphan is still committed standalone
    assert!(cal.event("/user/rachel/work/ghost").await.is_some());
}

#[tokio::test]
async fn unknown_tag_fails_strict_mode() {
    let cal = MemCal::new();
    let body = "<mystery><child>x</child></mystery>";
    let config = RestoreConfig {
        mode: Mode::Strict,
        ..Default::default()
    };
    let err = restore(&cal, config, (1, 1), body).await.unwrap_err();
    assert!(matches!(err, RestoreError::SchemaViolation(_)));
}

#[tokio::test]
async fn unknown_tag_skipped_in_lenient_mode() {
    let cal = MemCal::new();
    let body = &format!("<mystery><child>x</child></mystery>{SMALL_DATASET}");
    let outcome = restore(&cal, RestoreConfig::default(), (1, 1), body)
        .await
        .unwrap();
    assert_eq!(outcome.counts.skipped, 1);
    assert_eq!(outcome.counts.collections, 1);
}

#[tokio::test]
async fn mismatched_end_tag_is_fatal() {
    let cal = MemCal::new();
    // </event> closes a <collection>
    let file = dump_file((1, 1), "<collections><collection></event></collections>");
    let restorer = Restorer::new(
        Arc::new(cal.clone()),
        RestoreConfig {
            mode: Mode::Strict,
            ..Default::default()
        },
    );
    let err = restorer
        .open(file.path())
        .unwrap()
        .run(&NullListener)
        .await
        .unwrap_err();
    assert!(matches!(err, RestoreError::SchemaViolation(_)));
}

#[tokio::test]
async fn newer_major_version_rejected_in_strict_mode() {
    let cal = MemCal::new();
    let config = RestoreConfig {
        mode: Mode::Strict,
        ..Default::default()
    };
    let err = restore(&cal, config, (2, 0), SMALL_DATASET).await.unwrap_err();
    assert!(matches!(
        err,
        RestoreError::UnsupportedVersion { major: 2, minor: 0 }
    ));
}

#[tokio::test]
async fn alias_section_is_unknown_in_older_minor() {
    let cal = MemCal::new();
    let body = "\
<aliases><alias><owner>sam</owner><path>/user/sam/link</path>\
<target>/user/rachel/work</target></alias></aliases>";

    // 1.0 streams predate the alias section: lenient skips it
    let outcome = restore(&cal, RestoreConfig::default(), (1, 0), body)
        .await
        .unwrap();
    assert_eq!(outcome.counts.aliases, 0);
    assert_eq!(outcome.counts.skipped, 1);

    // strict 1.0 rejects it outright
    let config = RestoreConfig {
        mode: Mode::Strict,
        ..Default::default()
    };
    let err = restore(&cal, config, (1, 0), body).await.unwrap_err();
    assert!(matches!(err, RestoreError::SchemaViolation(_)));

    // a newer minor than ours still reads fine
    let outcome = restore(&cal, RestoreConfig::default(), (1, 9), body)
        .await
        .unwrap();
    assert_eq!(outcome.counts.aliases, 1);
}

#[tokio::test]
async fn alias_collections_feed_the_registry() {
    let cal = MemCal::new();
    let body = "\
<collections>\
  <collection><path>/user/rachel/work</path><owner>rachel</owner></collection>\
  <collection><path>/user/sam/shared</path><owner>sam</owner>\
    <alias-target>/user/rachel/work</alias-target></collection>\
  <collection><path>/user/sam/feed</path><owner>sam</owner>\
    <external-target>https://feeds.example.com/f</external-target></collection>\
</collections>";
    let outcome = restore(&cal, RestoreConfig::default(), (1, 1), body)
        .await
        .unwrap();

    assert_eq!(outcome.counts.aliases, 1);
    assert_eq!(outcome.counts.external_subs, 1);
    let entry = &outcome.aliases[&CollectionPath::new("/user/rachel/work")];
    assert_eq!(entry.aliases[0].owner, OwnerId::new("sam"));
    assert_eq!(outcome.external_subs[0].path, CollectionPath::new("/user/sam/feed"));
    // the alias target exists in the stream, so nothing is unresolved
    assert_eq!(outcome.counts.unresolved, 0);
}

#[tokio::test]
async fn duplicate_ids_fail_without_merge_and_overwrite_with() {
    let cal = MemCal::new();
    restore(&cal, RestoreConfig::default(), (1, 1), SMALL_DATASET)
        .await
        .unwrap();

    // plain re-restore: everything already exists
    let outcome = restore(&cal, RestoreConfig::default(), (1, 1), SMALL_DATASET)
        .await
        .unwrap();
    assert!(outcome.counts.failures > 0);

    // merge mode overwrites instead
    let config = RestoreConfig {
        merge: true,
        ..Default::default()
    };
    let outcome = restore(&cal, config, (1, 1), SMALL_DATASET).await.unwrap();
    assert_eq!(outcome.counts.failures, 0);
}

#[tokio::test]
async fn dry_run_parses_everything_but_commits_nothing() {
    let cal = MemCal::new();
    let config = RestoreConfig {
        dry_run: true,
        ..Default::default()
    };
    let outcome = restore(&cal, config, (1, 1), SMALL_DATASET).await.unwrap();

    assert_eq!(outcome.counts.collections, 1);
    assert_eq!(outcome.counts.events, 1);
    assert!(cal
        .collection(&CollectionPath::new("/user/rachel/work"))
        .await
        .is_none());
}

#[tokio::test]
async fn single_owner_scope_gates_other_subtrees() {
    let cal = MemCal::new();
    let body = "\
<collections>\
  <collection><path>/user/rachel/work</path><owner>rachel</owner></collection>\
  <collection><path>/user/sam/stuff</path><owner>sam</owner></collection>\
</collections>";
    let config = RestoreConfig {
        scope: RestoreScope::Owner(OwnerId::new("rachel")),
        ..Default::default()
    };
    let outcome = restore(&cal, config, (1, 1), body).await.unwrap();

    assert_eq!(outcome.counts.collections, 1);
    assert_eq!(outcome.counts.skipped, 1);
    assert!(cal
        .collection(&CollectionPath::new("/user/rachel/work"))
        .await
        .is_some());
    assert!(cal
        .collection(&CollectionPath::new("/user/sam/stuff"))
        .await
        .is_none());
}

#[tokio::test]
async fn lowercase_accounts_folds_owners() {
    let cal = MemCal::new();
    let body = "\
<collections><collection><path>/user/Rachel/work</path><owner>Rachel</owner>\
</collection></collections>";
    let config = RestoreConfig {
        lowercase_accounts: true,
        ..Default::default()
    };
    restore(&cal, config, (1, 1), body).await.unwrap();

    let col = cal
        .collection(&CollectionPath::new("/user/Rachel/work"))
        .await
        .unwrap();
    assert_eq!(col.owner, OwnerId::new("rachel"));
}

#[tokio::test]
async fn missing_header_is_fatal() {
    let cal = MemCal::new();
    let mut f = NamedTempFile::new().unwrap();
    write!(f, "<wrong-root></wrong-root>").unwrap();
    f.flush().unwrap();
    let restorer = Restorer::new(Arc::new(cal), RestoreConfig::default());
    let err = restorer.open(f.path()).unwrap_err();
    assert!(matches!(err, RestoreError::SchemaViolation(_)));
}

#[test]
fn alias_info_file_round_trips_through_loader() {
    let mut f = NamedTempFile::new().unwrap();
    write!(
        f,
        "<alias-info major-version=\"1\" minor-version=\"1\" \
         dumped-at=\"2026-08-01T00:00:00Z\">\
         <aliases><alias><owner>sam</owner><path>/user/sam/link</path>\
         <target>/user/rachel/work</target></alias></aliases>\
         <external-subscriptions><external-subscription><owner>sam</owner>\
         <path>/user/sam/feed</path></external-subscription>\
         </external-subscriptions></alias-info>"
    )
    .unwrap();
    f.flush().unwrap();

    let dump = load_alias_info(f.path()).unwrap();
    assert_eq!(dump.version.minor, 1);
    assert_eq!(dump.aliases.len(), 1);
    assert_eq!(dump.external_subs.len(), 1);
    assert_eq!(
        dump.aliases[&CollectionPath::new("/user/rachel/work")].aliases[0].path,
        CollectionPath::new("/user/sam/link")
    );
}

#[test]
fn wrong_root_for_alias_info_is_rejected() {
    let mut f = NamedTempFile::new().unwrap();
    write!(
        f,
        "<calendar-dump major-version=\"1\" minor-version=\"1\"></calendar-dump>"
    )
    .unwrap();
    f.flush().unwrap();
    assert!(matches!(
        load_alias_info(f.path()),
        Err(RestoreError::SchemaViolation(_))
    ));
}

mod ordering {
    use super::*;
    use proptest::prelude::*;

    // One master plus two overrides, in any stream order, must produce the
    // same attached structure.
    fn fragments() -> Vec<&'static str> {
        vec![
            "<event><uid>ev-1</uid><owner>rachel</owner><summary>Series</summary></event>",
            "<event><uid>ev-1</uid><owner>rachel</owner>\
             <recurrence-id>20260309T090000Z</recurrence-id><summary>Moved</summary></event>",
            "<event><uid>ev-1</uid><owner>rachel</owner>\
             <recurrence-id>20260316T090000Z</recurrence-id><summary>Cancelled</summary></event>",
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn override_resolution_is_order_independent(order in Just(fragments()).prop_shuffle()) {
            let body = format!(
                "<collections><collection><path>/user/rachel/work</path>\
                 <owner>rachel</owner>{}</collection></collections>",
                order.concat()
            );
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");
            rt.block_on(async {
                let cal = MemCal::new();
                let outcome = restore(&cal, RestoreConfig::default(), (1, 1), &body)
                    .await
                    .expect("restore");
                prop_assert_eq!(outcome.counts.events, 1);
                prop_assert_eq!(outcome.counts.overrides, 2);
                prop_assert_eq!(outcome.counts.unresolved, 0);

                let ev = cal.event("/user/rachel/work/ev-1").await.expect("event");
                prop_assert_eq!(ev.summary.as_str(), "Series");
                let mut rids: Vec<String> = ev
                    .overrides
                    .iter()
                    .filter_map(|o| o.recurrence_id.clone())
                    .collect();
                rids.sort();
                prop_assert_eq!(
                    rids,
                    vec![
                        "20260309T090000Z".to_string(),
                        "20260316T090000Z".to_string()
                    ]
                );
                Ok(())
            })?;
        }
    }
}
