//! Diagnostic views over a room's durable and live state.
//!
//! `inspect` and `raw_data` answer "what is actually on disk" — both read
//! the snapshot store, never the live document. `live_vs_persisted` holds
//! the two side by side: a mismatch there means the autosave/persist
//! pipeline dropped something, not that the application misbehaved, so
//! drift is reported as data rather than as an error.

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::engine::SharedDoc;
use crate::error::AdminError;
use crate::rooms::RoomRegistry;
use crate::store::{SnapshotStore, Subscriber};

/// Characters of blob text included in a raw-data preview.
const PREVIEW_CHARS: usize = 100;

/// Room state as seen from the snapshot store.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectReport {
    pub room_id: String,
    pub subscribers: Vec<Subscriber>,
    pub shared_references: JsonValue,
    pub shared_permissions: JsonValue,
    /// JSON projection of a document freshly rebuilt from the snapshot.
    pub document_view: JsonValue,
    pub connection_count: u64,
    /// Decoded snapshot size in bytes.
    pub document_size: u64,
}

/// Raw persisted blob metadata, no decoding.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDataReport {
    pub room_id: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    pub base64_length: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

/// Live-vs-persisted comparison.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveCompareReport {
    pub room_id: String,
    pub persisted_keys: Vec<String>,
    pub live_keys: Vec<String>,
    pub only_in_persisted: Vec<String>,
    pub only_in_live: Vec<String>,
    /// Deep value equality, not just key equality.
    pub data_match: bool,
}

/// Rebuild a document from the persisted snapshot and project it.
///
/// Returns `Ok(None)` when the room has no snapshot. A present snapshot
/// projects to `(view, decoded_len)`, where `view` is `None` for a
/// document with no entries.
fn persisted_view(
    store: &SnapshotStore,
    room_id: &str,
) -> Result<Option<(Option<JsonValue>, u64)>, AdminError> {
    let snapshot = match store.load_snapshot(room_id)? {
        Some(snapshot) => snapshot,
        None => return Ok(None),
    };
    let bytes = SharedDoc::decode_blob_text(&snapshot.blob)?;
    let doc = SharedDoc::new();
    doc.apply_update(&bytes)?;
    Ok(Some((doc.to_json(), bytes.len() as u64)))
}

/// Inspect a room's durable state.
///
/// The document view comes from a document freshly reconstructed off the
/// snapshot store, so this reflects what would survive a restart — not
/// what the live instance currently serves.
pub async fn inspect(
    store: &SnapshotStore,
    registry: &RoomRegistry,
    room_id: &str,
) -> Result<InspectReport, AdminError> {
    let view = match persisted_view(store, room_id)? {
        Some((Some(view), size)) => (view, size),
        _ => {
            return Err(AdminError::NotFound(format!(
                "room {room_id} has no document data"
            )))
        }
    };

    Ok(InspectReport {
        room_id: room_id.to_string(),
        subscribers: store.load_subscribers(room_id)?,
        shared_references: store.load_references(room_id)?,
        shared_permissions: store.load_permissions(room_id)?,
        document_view: view.0,
        connection_count: registry.connection_count(room_id).await,
        document_size: view.1,
    })
}

/// Return the raw persisted blob and its metadata without decoding.
pub fn raw_data(store: &SnapshotStore, room_id: &str) -> Result<RawDataReport, AdminError> {
    let snapshot = match store.load_snapshot(room_id)? {
        Some(snapshot) => snapshot,
        None => {
            return Ok(RawDataReport {
                room_id: room_id.to_string(),
                exists: false,
                document: None,
                base64_length: 0,
                created_at: None,
                preview: None,
            })
        }
    };
    let created_at = store.load_metadata(room_id)?.map(|m| m.created_at);
    let preview: String = snapshot.blob.chars().take(PREVIEW_CHARS).collect();

    Ok(RawDataReport {
        room_id: room_id.to_string(),
        exists: true,
        base64_length: snapshot.blob.len() as u64,
        document: Some(snapshot.blob),
        created_at,
        preview: Some(preview),
    })
}

/// Compare the durable view against what the live instance serves.
pub async fn live_vs_persisted(
    store: &SnapshotStore,
    registry: &RoomRegistry,
    room_id: &str,
) -> Result<LiveCompareReport, AdminError> {
    let persisted = persisted_view(store, room_id)?
        .and_then(|(view, _)| view);
    let live = registry.get_live(room_id).await?.doc().to_json();

    let persisted_keys = top_level_keys(persisted.as_ref());
    let live_keys = top_level_keys(live.as_ref());

    let only_in_persisted: Vec<String> = persisted_keys
        .iter()
        .filter(|k| !live_keys.contains(k))
        .cloned()
        .collect();
    let only_in_live: Vec<String> = live_keys
        .iter()
        .filter(|k| !persisted_keys.contains(k))
        .cloned()
        .collect();

    let data_match = persisted.clone().unwrap_or(JsonValue::Null)
        == live.clone().unwrap_or(JsonValue::Null);
    if !data_match {
        log::warn!(
            "Drift detected in room {room_id}: persisted {} keys, live {} keys",
            persisted_keys.len(),
            live_keys.len()
        );
    }

    Ok(LiveCompareReport {
        room_id: room_id.to_string(),
        persisted_keys,
        live_keys,
        only_in_persisted,
        only_in_live,
        data_match,
    })
}

fn top_level_keys(view: Option<&JsonValue>) -> Vec<String> {
    let mut keys: Vec<String> = view
        .and_then(|v| v.as_object())
        .map(|obj| obj.keys().cloned().collect())
        .unwrap_or_default();
    keys.sort();
    keys
}
