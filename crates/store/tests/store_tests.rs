//! Integration tests for the rights store
//!
//! Exercises the store against real SQLite databases: upsert idempotency,
//! concurrent upserts on one tuple, the delete variants, the distinct
//! queries, and persistence across reopen.

use std::sync::Arc;
use std::thread;

use common::{RightInfo, VALID_PERIOD_ALWAYS, VALID_PERIOD_TEMPORARY};
use store::RightsStore;

const UID: i32 = 100;
const DEV: &str = "1234-5678";
const APP: &str = "com.example.app";
const TOKEN: &str = "T1";

fn info(request_time: i64, valid_period: i64) -> RightInfo {
    RightInfo {
        uid: UID,
        install_time: request_time - 20,
        update_time: request_time - 10,
        request_time,
        valid_period,
    }
}

#[test]
fn test_add_then_query_roundtrip() {
    let store = RightsStore::open_in_memory().unwrap();
    store.add_or_update(UID, DEV, APP, TOKEN, info(1000, 300)).unwrap();

    let records = store.query_records(UID, DEV, APP, TOKEN).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].uid, UID);
    assert_eq!(records[0].device_key, DEV);
    assert_eq!(records[0].app_id, APP);
    assert_eq!(records[0].client_token, TOKEN);
    assert_eq!(records[0].request_time, 1000);
}

#[test]
fn test_add_or_update_is_idempotent_per_tuple() {
    let store = RightsStore::open_in_memory().unwrap();
    store.add_or_update(UID, DEV, APP, TOKEN, info(1000, 300)).unwrap();
    store.add_or_update(UID, DEV, APP, TOKEN, info(2000, 600)).unwrap();

    let records = store.query_records(UID, DEV, APP, TOKEN).unwrap();
    assert_eq!(records.len(), 1, "repeat grant must refresh, not duplicate");
    assert_eq!(records[0].request_time, 2000);
    assert_eq!(records[0].valid_period, 600);
}

#[test]
fn test_different_tokens_are_distinct_grants() {
    let store = RightsStore::open_in_memory().unwrap();
    store.add_or_update(UID, DEV, APP, "T1", info(1000, 300)).unwrap();
    store.add_or_update(UID, DEV, APP, "T2", info(1000, 300)).unwrap();

    assert_eq!(store.query_device_records(UID, DEV).unwrap().len(), 2);
    assert_eq!(store.query_records(UID, DEV, APP, "T1").unwrap().len(), 1);
}

#[test]
fn test_concurrent_upserts_leave_one_row() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RightsStore::open(&dir.path().join("rights.db")).unwrap());

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for j in 0..16 {
                store
                    .add_or_update(UID, DEV, APP, TOKEN, info(1000 + i * 100 + j, 300))
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let records = store.query_records(UID, DEV, APP, TOKEN).unwrap();
    assert_eq!(records.len(), 1);
}

#[test]
fn test_is_expired_any_matching_row_grants() {
    let store = RightsStore::open_in_memory().unwrap();
    store.add_or_update(UID, DEV, APP, TOKEN, info(1000, 300)).unwrap();

    assert!(!store.is_expired(UID, DEV, APP, TOKEN, 1299).unwrap());
    assert!(store.is_expired(UID, DEV, APP, TOKEN, 1301).unwrap());
    // unknown tuple is expired (fail-closed)
    assert!(store.is_expired(UID, DEV, "com.other.app", TOKEN, 1000).unwrap());
}

#[test]
fn test_delete_exact_tuple_only() {
    let store = RightsStore::open_in_memory().unwrap();
    store.add_or_update(UID, DEV, APP, "T1", info(1000, 300)).unwrap();
    store.add_or_update(UID, DEV, APP, "T2", info(1000, 300)).unwrap();

    assert_eq!(store.delete_record(UID, DEV, APP, "T1").unwrap(), 1);
    assert_eq!(store.query_device_records(UID, DEV).unwrap().len(), 1);
    // deleting again matches nothing and is still Ok
    assert_eq!(store.delete_record(UID, DEV, APP, "T1").unwrap(), 0);
}

#[test]
fn test_session_sweep_spares_other_grants() {
    let store = RightsStore::open_in_memory().unwrap();
    store
        .add_or_update(UID, DEV, APP, "T1", info(1000, VALID_PERIOD_TEMPORARY))
        .unwrap();
    store
        .add_or_update(UID, DEV, "com.other.app", "T2", info(1000, VALID_PERIOD_ALWAYS))
        .unwrap();
    store
        .add_or_update(UID, "9-9", APP, "T3", info(1000, VALID_PERIOD_TEMPORARY))
        .unwrap();

    assert_eq!(store.delete_temporary_records(DEV).unwrap(), 1);

    // the permanent grant on the same device and the session grant on the
    // other device both survive
    assert_eq!(store.query_device_records(UID, DEV).unwrap().len(), 1);
    assert_eq!(store.query_device_records(UID, "9-9").unwrap().len(), 1);
}

#[test]
fn test_normal_expiry_keeps_sentinel_periods() {
    let store = RightsStore::open_in_memory().unwrap();
    store.add_or_update(UID, DEV, "app.timed", "T1", info(1000, 300)).unwrap();
    store
        .add_or_update(UID, DEV, "app.session", "T2", info(1000, VALID_PERIOD_TEMPORARY))
        .unwrap();
    store
        .add_or_update(UID, DEV, "app.forever", "T3", info(1000, VALID_PERIOD_ALWAYS))
        .unwrap();

    let deleted = store.delete_normal_expired(UID, 10_000).unwrap();
    assert_eq!(deleted, 1);

    let apps = store.query_right_apps(UID).unwrap();
    assert!(apps.contains(&"app.session".to_string()));
    assert!(apps.contains(&"app.forever".to_string()));
    assert!(!apps.contains(&"app.timed".to_string()));
}

#[test]
fn test_delete_apps_records_set() {
    let store = RightsStore::open_in_memory().unwrap();
    store.add_or_update(UID, DEV, "app.a", "T1", info(1000, 300)).unwrap();
    store.add_or_update(UID, DEV, "app.b", "T2", info(1000, 300)).unwrap();
    store.add_or_update(UID, DEV, "app.c", "T3", info(1000, 300)).unwrap();

    let doomed = vec!["app.a".to_string(), "app.c".to_string()];
    assert_eq!(store.delete_apps_records(UID, &doomed).unwrap(), 2);
    assert_eq!(store.query_right_apps(UID).unwrap(), vec!["app.b".to_string()]);

    // empty set is a no-op, not an error
    assert_eq!(store.delete_apps_records(UID, &[]).unwrap(), 0);
}

#[test]
fn test_distinct_uid_query_tracks_deletion() {
    let store = RightsStore::open_in_memory().unwrap();
    store.add_or_update(100, DEV, APP, "T1", info(1000, 300)).unwrap();
    store.add_or_update(101, DEV, APP, "T2", info(1000, 300)).unwrap();
    store.add_or_update(101, "9-9", APP, "T3", info(1000, 300)).unwrap();

    let mut uids = store.query_right_uids().unwrap();
    uids.sort_unstable();
    assert_eq!(uids, vec![100, 101]);

    store.delete_uid_records(101).unwrap();
    assert_eq!(store.query_right_uids().unwrap(), vec![100]);
}

#[test]
fn test_grants_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rights.db");
    {
        let store = RightsStore::open(&path).unwrap();
        store.add_or_update(UID, DEV, APP, TOKEN, info(1000, VALID_PERIOD_ALWAYS)).unwrap();
    }
    let store = RightsStore::open(&path).unwrap();
    assert!(!store.is_expired(UID, DEV, APP, TOKEN, i64::MAX - 1).unwrap());
}
