//! Administrative recovery operations.
//!
//! Everything here mutates a room's live document, its snapshot row, or
//! both. Operations that do both run as a sequential pipeline — mutate
//! live, then persist — and are NOT transactional: a persist failure after
//! a successful live mutation leaves the room's live state ahead of its
//! durable state until a later save reconciles them. That outcome is
//! reported in the operation's result (`persisted: false`), never hidden.
//!
//! Every operation logs affected counts and sizes for audit, and every
//! operation serializes on the room's gate.

use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::engine::SharedDoc;
use crate::error::AdminError;
use crate::rooms::{RoomHandle, RoomRegistry};
use crate::store::{SnapshotMetadata, SnapshotStore, StoreError};

/// Result of a force-save.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReport {
    pub room_id: String,
    pub blob_len: u64,
    pub doc_bytes: u64,
    pub saved_at: u64,
}

/// Result of a force-reload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadReport {
    pub room_id: String,
    pub blob_len: u64,
}

/// Result of saving admin-edited data. `persisted: false` means the live
/// document was updated but the snapshot write failed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditReport {
    pub room_id: String,
    pub live_updated: bool,
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_error: Option<String>,
}

/// Result of an orphan sweep.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanReport {
    pub room_id: String,
    pub tag: String,
    pub dry_run: bool,
    pub total: usize,
    pub active: usize,
    pub orphaned: usize,
    pub orphaned_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persisted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_error: Option<String>,
}

/// Result of a hard reset (merge-history garbage collection).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetReport {
    pub room_id: String,
    pub was_empty: bool,
    pub before_size: u64,
    pub after_size: u64,
    pub size_reduction: i64,
    pub size_reduction_percent: f64,
}

/// Result of a raw-document restore.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub room_id: String,
    pub blob_len: u64,
    pub doc_bytes: u64,
}

/// Result of a subscriber removal.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberReport {
    pub room_id: String,
    pub removed: usize,
    pub remaining: usize,
}

/// Encode the room's live document and upsert it into the snapshot store.
fn persist_live(store: &SnapshotStore, handle: &RoomHandle) -> Result<SnapshotMetadata, StoreError> {
    let bytes = handle.doc().encode();
    let blob = general_purpose::STANDARD.encode(&bytes);
    store.save_snapshot(handle.room_id(), &blob, bytes.len() as u64)
}

/// Encode the live document and persist it. Idempotent, last-write-wins.
pub async fn force_save_live(
    store: &SnapshotStore,
    registry: &RoomRegistry,
    room_id: &str,
) -> Result<SaveReport, AdminError> {
    let handle = registry.get_live(room_id).await?;
    let _guard = handle.lock().await;

    let meta = persist_live(store, &handle)?;
    log::info!(
        "Force-saved room {room_id}: {} doc bytes, {} blob chars",
        meta.doc_bytes,
        meta.blob_len
    );
    Ok(SaveReport {
        room_id: room_id.to_string(),
        blob_len: meta.blob_len,
        doc_bytes: meta.doc_bytes,
        saved_at: meta.saved_at,
    })
}

/// Replace the live document's content from the persisted snapshot.
pub async fn force_reload_live(
    store: &SnapshotStore,
    registry: &RoomRegistry,
    room_id: &str,
) -> Result<ReloadReport, AdminError> {
    let handle = registry.get_live(room_id).await?;
    let _guard = handle.lock().await;

    let snapshot = store.load_snapshot(room_id)?.ok_or_else(|| {
        AdminError::NotFound(format!("room {room_id} has no snapshot to reload from"))
    })?;
    handle.doc().replace_from_snapshot(&snapshot.blob)?;

    log::info!(
        "Force-reloaded room {room_id} from snapshot ({} chars)",
        snapshot.blob.len()
    );
    Ok(ReloadReport {
        room_id: room_id.to_string(),
        blob_len: snapshot.blob.len() as u64,
    })
}

/// Replace the live document from admin-edited JSON, then persist.
///
/// The two steps are sequential, not atomic. A snapshot-write failure
/// after the live replacement is reported, not rolled back.
pub async fn save_edited_data(
    store: &SnapshotStore,
    registry: &RoomRegistry,
    room_id: &str,
    data: &JsonValue,
) -> Result<EditReport, AdminError> {
    if !data.is_object() {
        return Err(AdminError::Validation(
            "edited data must be a non-null JSON object".into(),
        ));
    }

    let handle = registry.get_live(room_id).await?;
    let _guard = handle.lock().await;

    handle
        .doc()
        .replace_from_json(data)
        .map_err(|e| AdminError::Validation(e.to_string()))?;

    match persist_live(store, &handle) {
        Ok(meta) => {
            log::info!(
                "Saved edited data for room {room_id}: {} doc bytes persisted",
                meta.doc_bytes
            );
            Ok(EditReport {
                room_id: room_id.to_string(),
                live_updated: true,
                persisted: true,
                persist_error: None,
            })
        }
        Err(e) => {
            log::error!("save_edited_data: persist failed for room {room_id}: {e}");
            Ok(EditReport {
                room_id: room_id.to_string(),
                live_updated: true,
                persisted: false,
                persist_error: Some(e.to_string()),
            })
        }
    }
}

/// Remove element entries under `tag` whose ids are not in `active_ids`.
///
/// With `dry_run`, reports what would be removed and mutates nothing.
/// Otherwise deletions continue past individual failures, counting
/// successes, and the result is persisted.
pub async fn cleanup_orphans(
    store: &SnapshotStore,
    registry: &RoomRegistry,
    room_id: &str,
    tag: &str,
    active_ids: &[String],
    dry_run: bool,
) -> Result<OrphanReport, AdminError> {
    if tag.is_empty() {
        return Err(AdminError::Validation("tag is required".into()));
    }

    let handle = registry.get_live(room_id).await?;
    let _guard = handle.lock().await;

    let all_ids = handle.doc().element_ids(tag);
    let orphaned_ids: Vec<String> = all_ids
        .iter()
        .filter(|id| !active_ids.contains(id))
        .cloned()
        .collect();
    let total = all_ids.len();
    let active = total - orphaned_ids.len();

    log::info!(
        "Orphan sweep for room {room_id} tag '{tag}': {total} total, {} orphaned (dry_run={dry_run})",
        orphaned_ids.len()
    );

    if dry_run {
        return Ok(OrphanReport {
            room_id: room_id.to_string(),
            tag: tag.to_string(),
            dry_run: true,
            total,
            active,
            orphaned: orphaned_ids.len(),
            orphaned_ids,
            removed: None,
            persisted: None,
            persist_error: None,
        });
    }

    let mut removed = 0usize;
    for id in &orphaned_ids {
        if handle.doc().remove_entry(tag, id) {
            removed += 1;
        } else {
            log::warn!("Orphan sweep: entry ({tag}, {id}) vanished before removal");
        }
    }

    let (persisted, persist_error) = match persist_live(store, &handle) {
        Ok(_) => (true, None),
        Err(e) => {
            log::error!("cleanup_orphans: persist failed for room {room_id}: {e}");
            (false, Some(e.to_string()))
        }
    };

    log::info!("Orphan sweep for room {room_id} tag '{tag}': removed {removed} entries");
    Ok(OrphanReport {
        room_id: room_id.to_string(),
        tag: tag.to_string(),
        dry_run: false,
        total,
        active,
        orphaned: orphaned_ids.len(),
        orphaned_ids,
        removed: Some(removed),
        persisted: Some(persisted),
        persist_error,
    })
}

/// Garbage-collect CRDT merge history by rebuilding the document from its
/// JSON projection.
///
/// Merge metadata accumulates monotonically through normal edits; a fresh
/// document populated purely from the projected content has none of it by
/// construction. The rebuilt encoding is persisted first, then applied onto
/// the live instance, so the JSON-visible content is preserved exactly.
pub async fn hard_reset(
    store: &SnapshotStore,
    registry: &RoomRegistry,
    room_id: &str,
) -> Result<ResetReport, AdminError> {
    let handle = registry.get_live(room_id).await?;
    let _guard = handle.lock().await;

    let before_size = handle.doc().encode().len() as u64;
    let before = handle.doc().to_json();

    let fresh = SharedDoc::new();
    let was_empty = match &before {
        Some(json) => {
            fresh.replace_from_json(json)?;
            false
        }
        None => true,
    };

    let fresh_bytes = fresh.encode();
    let after_size = fresh_bytes.len() as u64;
    let blob = general_purpose::STANDARD.encode(&fresh_bytes);

    store.save_snapshot(room_id, &blob, after_size)?;
    handle.doc().replace_from_snapshot(&blob)?;

    let size_reduction = before_size as i64 - after_size as i64;
    let size_reduction_percent = if before_size > 0 {
        ((size_reduction as f64 / before_size as f64) * 10_000.0).round() / 100.0
    } else {
        0.0
    };

    log::info!(
        "Hard reset room {room_id}: {before_size} → {after_size} bytes \
         ({size_reduction_percent}% reclaimed, was_empty={was_empty})"
    );
    Ok(ResetReport {
        room_id: room_id.to_string(),
        was_empty,
        before_size,
        after_size,
        size_reduction,
        size_reduction_percent,
    })
}

/// Persist a caller-supplied blob verbatim and load it into the live
/// document.
///
/// Unlike a hard reset this preserves the blob's full merge history. The
/// blob is validated against a scratch document first; an undecodable blob
/// changes nothing.
pub async fn restore_raw_document(
    store: &SnapshotStore,
    registry: &RoomRegistry,
    room_id: &str,
    blob: &str,
) -> Result<RestoreReport, AdminError> {
    let handle = registry.get_live(room_id).await?;
    let _guard = handle.lock().await;

    // Pure validation pass; the scratch document is discarded.
    let bytes = SharedDoc::decode_blob_text(blob)
        .map_err(|e| AdminError::Validation(format!("document is not valid base64: {e}")))?;
    let scratch = SharedDoc::new();
    scratch
        .apply_update(&bytes)
        .map_err(|e| AdminError::Validation(format!("document failed to decode: {e}")))?;

    store.save_snapshot(room_id, blob, bytes.len() as u64)?;
    handle.doc().replace_from_snapshot(blob)?;

    log::info!(
        "Restored raw document for room {room_id}: {} chars, {} doc bytes",
        blob.len(),
        bytes.len()
    );
    Ok(RestoreReport {
        room_id: room_id.to_string(),
        blob_len: blob.len() as u64,
        doc_bytes: bytes.len() as u64,
    })
}

/// Remove all subscriber entries registered by `consumer_room_id`.
pub async fn remove_subscriber(
    store: &SnapshotStore,
    registry: &RoomRegistry,
    room_id: &str,
    consumer_room_id: &str,
) -> Result<SubscriberReport, AdminError> {
    if consumer_room_id.is_empty() {
        return Err(AdminError::Validation("consumerRoomId is required".into()));
    }

    let handle = registry.get_live(room_id).await?;
    let _guard = handle.lock().await;

    let subscribers = store.load_subscribers(room_id)?;
    let before = subscribers.len();
    let remaining: Vec<_> = subscribers
        .into_iter()
        .filter(|s| s.consumer_room_id != consumer_room_id)
        .collect();
    let removed = before - remaining.len();
    store.store_subscribers(room_id, &remaining)?;

    log::info!(
        "Removed {removed} subscriber(s) for {consumer_room_id} from room {room_id} \
         ({} remaining)",
        remaining.len()
    );
    Ok(SubscriberReport {
        room_id: room_id.to_string(),
        removed,
        remaining: remaining.len(),
    })
}
