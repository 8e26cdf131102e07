//! Recovery and reconciliation integration tests.
//!
//! Verifies:
//! - Hard reset preserves the JSON view exactly and never grows the encoding
//! - Orphan cleanup dry-run reports without mutating; destructive run persists
//! - Raw restore validates first and leaves no trace on failure
//! - Raw restore persists the supplied blob verbatim on success
//! - Live-vs-persisted drift detection around force-save
//! - Edited-data saves land in both live and durable state

use std::sync::Arc;

use mosaic_sync::engine::SharedDoc;
use mosaic_sync::error::AdminError;
use mosaic_sync::inspect;
use mosaic_sync::recovery;
use mosaic_sync::rooms::RoomRegistry;
use mosaic_sync::store::{SnapshotStore, StoreConfig};

use serde_json::json;
use tempfile::tempdir;

// ─── Helpers ─────────────────────────────────────────────────────────────

fn setup(dir: &std::path::Path) -> (Arc<SnapshotStore>, RoomRegistry) {
    let store = Arc::new(SnapshotStore::open(StoreConfig::for_testing(dir.join("db"))).unwrap());
    let registry = RoomRegistry::new(store.clone());
    (store, registry)
}

/// Churn a document: repeated overwrites and deletions leave merge
/// tombstones behind that only a hard reset can reclaim.
fn churn(doc: &SharedDoc) {
    for round in 0..20 {
        for id in ["a", "b", "c", "d", "e"] {
            doc.set_entry("can-move", id, &json!({"x": round, "y": round * 2}));
        }
    }
    for id in ["c", "d", "e"] {
        doc.remove_entry("can-move", id);
    }
    doc.set_entry("can-spin", "logo", &json!({"deg": 180}));
}

// ─── Hard reset ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_hard_reset_preserves_json_and_never_grows() {
    let dir = tempdir().unwrap();
    let (store, registry) = setup(dir.path());

    let handle = registry.get_live("room-1").await.unwrap();
    churn(handle.doc());

    let before_view = handle.doc().to_json().unwrap();
    let before_size = handle.doc().encode().len() as u64;

    let report = recovery::hard_reset(&store, &registry, "room-1").await.unwrap();

    assert!(!report.was_empty);
    assert_eq!(report.before_size, before_size);
    assert!(report.after_size <= report.before_size);
    assert_eq!(
        report.size_reduction,
        report.before_size as i64 - report.after_size as i64
    );

    // The live document still projects to exactly the pre-reset content.
    assert_eq!(handle.doc().to_json().unwrap(), before_view);

    // So does a document rebuilt from the persisted snapshot.
    let snapshot = store.load_snapshot("room-1").unwrap().unwrap();
    let rebuilt = SharedDoc::new();
    rebuilt.apply_blob_text(&snapshot.blob).unwrap();
    assert_eq!(rebuilt.to_json().unwrap(), before_view);
}

#[tokio::test]
async fn test_hard_reset_reclaims_tombstone_space() {
    let dir = tempdir().unwrap();
    let (store, registry) = setup(dir.path());

    let handle = registry.get_live("room-1").await.unwrap();
    churn(handle.doc());

    let report = recovery::hard_reset(&store, &registry, "room-1").await.unwrap();

    // Twenty rounds of overwrites plus deletions accumulate history a
    // rebuilt document does not carry.
    assert!(report.size_reduction > 0);
    assert!(report.size_reduction_percent > 0.0);
}

#[tokio::test]
async fn test_hard_reset_empty_room_reports_was_empty() {
    let dir = tempdir().unwrap();
    let (store, registry) = setup(dir.path());

    let report = recovery::hard_reset(&store, &registry, "empty-room").await.unwrap();
    assert!(report.was_empty);
    assert!(report.after_size <= report.before_size);

    // An empty snapshot was persisted and still projects to "no data".
    let snapshot = store.load_snapshot("empty-room").unwrap().unwrap();
    let rebuilt = SharedDoc::new();
    rebuilt.apply_blob_text(&snapshot.blob).unwrap();
    assert!(rebuilt.to_json().is_none());
}

#[tokio::test]
async fn test_hard_reset_is_idempotent_on_content() {
    let dir = tempdir().unwrap();
    let (store, registry) = setup(dir.path());

    let handle = registry.get_live("room-1").await.unwrap();
    churn(handle.doc());
    let view = handle.doc().to_json().unwrap();

    let first = recovery::hard_reset(&store, &registry, "room-1").await.unwrap();
    let second = recovery::hard_reset(&store, &registry, "room-1").await.unwrap();

    assert_eq!(handle.doc().to_json().unwrap(), view);
    assert!(second.after_size <= first.after_size);
}

// ─── Orphan cleanup ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_cleanup_orphans_dry_run_reports_without_mutating() {
    let dir = tempdir().unwrap();
    let (store, registry) = setup(dir.path());

    let handle = registry.get_live("room-1").await.unwrap();
    for id in ["a", "b", "c", "d"] {
        handle.doc().set_entry("can-move", id, &json!({"held": true}));
    }

    let active = vec!["a".to_string(), "b".to_string()];
    let report =
        recovery::cleanup_orphans(&store, &registry, "room-1", "can-move", &active, true)
            .await
            .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.total, 4);
    assert_eq!(report.active, 2);
    assert_eq!(report.orphaned, 2);
    let mut ids = report.orphaned_ids.clone();
    ids.sort();
    assert_eq!(ids, vec!["c", "d"]);
    assert!(report.removed.is_none());

    // Nothing was touched: document still holds all four, nothing persisted.
    assert_eq!(handle.doc().element_ids("can-move").len(), 4);
    assert!(!store.snapshot_exists("room-1").unwrap());
}

#[tokio::test]
async fn test_cleanup_orphans_removes_and_persists() {
    let dir = tempdir().unwrap();
    let (store, registry) = setup(dir.path());

    let handle = registry.get_live("room-1").await.unwrap();
    for id in ["a", "b", "c", "d"] {
        handle.doc().set_entry("can-move", id, &json!(1));
    }
    handle.doc().set_entry("can-spin", "keep", &json!(2));

    let active = vec!["a".to_string(), "b".to_string()];
    let report =
        recovery::cleanup_orphans(&store, &registry, "room-1", "can-move", &active, false)
            .await
            .unwrap();

    assert_eq!(report.total, 4);
    assert_eq!(report.removed, Some(2));
    assert_eq!(report.persisted, Some(true));

    let mut remaining = handle.doc().element_ids("can-move");
    remaining.sort();
    assert_eq!(remaining, vec!["a", "b"]);
    // Other tags are untouched.
    assert_eq!(handle.doc().element_ids("can-spin"), vec!["keep"]);

    // The sweep result reached durable state.
    let snapshot = store.load_snapshot("room-1").unwrap().unwrap();
    let rebuilt = SharedDoc::new();
    rebuilt.apply_blob_text(&snapshot.blob).unwrap();
    assert_eq!(rebuilt.to_json().unwrap(), handle.doc().to_json().unwrap());
}

#[tokio::test]
async fn test_cleanup_orphans_unknown_tag_is_empty_sweep() {
    let dir = tempdir().unwrap();
    let (store, registry) = setup(dir.path());
    registry.get_live("room-1").await.unwrap();

    let report = recovery::cleanup_orphans(&store, &registry, "room-1", "can-hover", &[], false)
        .await
        .unwrap();
    assert_eq!(report.total, 0);
    assert_eq!(report.removed, Some(0));
}

// ─── Raw restore ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_restore_invalid_blob_changes_nothing() {
    let dir = tempdir().unwrap();
    let (store, registry) = setup(dir.path());

    // Establish a known good state first.
    recovery::save_edited_data(&store, &registry, "room-1", &json!({"can-move": {"a": 1}}))
        .await
        .unwrap();
    let before = inspect::raw_data(&store, "room-1").unwrap();
    let live_before = registry.get_live("room-1").await.unwrap().doc().to_json();

    // Not base64 at all, and valid base64 wrapping an undecodable payload.
    let truncated = {
        use base64::{engine::general_purpose, Engine as _};
        general_purpose::STANDARD.encode([0xFFu8; 32])
    };
    for bad in ["%%%not-base64%%%", truncated.as_str()] {
        let err = recovery::restore_raw_document(&store, &registry, "room-1", bad)
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Validation(_)), "blob {bad:?}");
    }

    // Store row and live document are both untouched.
    let after = inspect::raw_data(&store, "room-1").unwrap();
    assert_eq!(after.document, before.document);
    assert_eq!(after.base64_length, before.base64_length);
    assert_eq!(after.created_at, before.created_at);
    let live_after = registry.get_live("room-1").await.unwrap().doc().to_json();
    assert_eq!(live_after, live_before);
}

#[tokio::test]
async fn test_restore_valid_blob_is_verbatim() {
    let dir = tempdir().unwrap();
    let (store, registry) = setup(dir.path());

    // A blob with real history: edits and an overwrite.
    let source = SharedDoc::new();
    source.set_entry("can-move", "a", &json!({"x": 1}));
    source.set_entry("can-move", "a", &json!({"x": 2}));
    source.set_entry("can-grow", "g", &json!({"scale": 3}));
    let blob = source.encode_text();

    let report = recovery::restore_raw_document(&store, &registry, "room-1", &blob)
        .await
        .unwrap();
    assert_eq!(report.blob_len, blob.len() as u64);

    // The stored blob is byte-for-byte what the caller supplied — full
    // history preserved, unlike a hard reset.
    let stored = store.load_snapshot("room-1").unwrap().unwrap();
    assert_eq!(stored.blob, blob);

    // The live instance now serves the restored content.
    let handle = registry.get_live("room-1").await.unwrap();
    assert_eq!(
        handle.doc().to_json().unwrap(),
        json!({"can-move": {"a": {"x": 2}}, "can-grow": {"g": {"scale": 3}}})
    );
}

// ─── Drift detection around saves ────────────────────────────────────────

#[tokio::test]
async fn test_live_compare_tracks_save_state() {
    let dir = tempdir().unwrap();
    let (store, registry) = setup(dir.path());

    let handle = registry.get_live("room-1").await.unwrap();
    handle.doc().set_entry("can-move", "a", &json!(1));

    // Mutated but never saved: drift.
    let report = inspect::live_vs_persisted(&store, &registry, "room-1").await.unwrap();
    assert!(!report.data_match);

    // Right after a force-save: no drift.
    recovery::force_save_live(&store, &registry, "room-1").await.unwrap();
    let report = inspect::live_vs_persisted(&store, &registry, "room-1").await.unwrap();
    assert!(report.data_match);

    // Another unsaved mutation: drift again.
    handle.doc().set_entry("can-move", "b", &json!(2));
    let report = inspect::live_vs_persisted(&store, &registry, "room-1").await.unwrap();
    assert!(!report.data_match);
}

#[tokio::test]
async fn test_save_edited_data_reaches_durable_view() {
    let dir = tempdir().unwrap();
    let (store, registry) = setup(dir.path());

    let edited = json!({"can-toggle": {"switch": {"on": true}}});
    let report = recovery::save_edited_data(&store, &registry, "room-1", &edited)
        .await
        .unwrap();
    assert!(report.live_updated);
    assert!(report.persisted);

    // Inspection reads durable state, which now carries the edit.
    let inspected = inspect::inspect(&store, &registry, "room-1").await.unwrap();
    assert_eq!(inspected.document_view, edited);
}

#[tokio::test]
async fn test_force_reload_discards_unsaved_live_changes() {
    let dir = tempdir().unwrap();
    let (store, registry) = setup(dir.path());

    recovery::save_edited_data(&store, &registry, "room-1", &json!({"can-move": {"a": 1}}))
        .await
        .unwrap();

    let handle = registry.get_live("room-1").await.unwrap();
    handle.doc().set_entry("can-move", "stray", &json!(9));
    handle.doc().remove_entry("can-move", "a");

    recovery::force_reload_live(&store, &registry, "room-1").await.unwrap();
    assert_eq!(handle.doc().to_json().unwrap(), json!({"can-move": {"a": 1}}));
}

// ─── Registry + store lifecycle ──────────────────────────────────────────

#[tokio::test]
async fn test_recovery_survives_process_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("db");
    let content = json!({"can-move": {"box": {"x": 7}}});

    {
        let store = Arc::new(SnapshotStore::open(StoreConfig::for_testing(db_path.clone())).unwrap());
        let registry = RoomRegistry::new(store.clone());
        recovery::save_edited_data(&store, &registry, "room-1", &content)
            .await
            .unwrap();
    }

    // "Restart": new store handle, new registry, same directory.
    let store = Arc::new(SnapshotStore::open(StoreConfig::for_testing(db_path)).unwrap());
    let registry = RoomRegistry::new(store.clone());
    let handle = registry.get_live("room-1").await.unwrap();
    assert_eq!(handle.doc().to_json().unwrap(), content);
}
