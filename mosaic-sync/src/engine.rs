//! CRDT document engine wrapper.
//!
//! A room's shared state is one Yrs document with a single root map:
//!
//! ```text
//! "elements" (root map)
//!   ├── "can-move"  → { "box-1": {...}, "box-2": {...} }
//!   ├── "can-spin"  → { "logo": {...} }
//!   └── <tag>       → { <elementId> → JSON value }
//! ```
//!
//! Merge semantics live entirely inside Yrs — this module never touches
//! them. It only offers the narrow surface the reconciliation layer needs:
//! create-empty, apply-binary-update, full-state encode, JSON projection,
//! and structural `(tag, elementId)` mutation. Mutations insert and remove
//! keys on the existing maps; the document reference itself is never
//! swapped, so every holder of a [`SharedDoc`] clone observes updates.

use std::collections::HashMap;
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use serde_json::Value as JsonValue;
use yrs::updates::decoder::Decode;
use yrs::types::ToJson;
use yrs::{Any, Doc, Map, MapPrelim, Out, ReadTxn, StateVector, Transact, Update, WriteTxn};

/// Name of the root map holding per-tag element state.
const ROOT_MAP: &str = "elements";

/// Engine errors.
#[derive(Debug, Clone)]
pub enum EngineError {
    /// Blob failed base64 or update decoding.
    Decode(String),
    /// A decoded update could not be applied.
    Apply(String),
    /// JSON input had the wrong shape for the document.
    InvalidJson(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Decode(e) => write!(f, "Decode error: {e}"),
            EngineError::Apply(e) => write!(f, "Apply error: {e}"),
            EngineError::InvalidJson(e) => write!(f, "Invalid JSON: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Handle to a live CRDT document.
///
/// Clones share the same underlying document, so a clone held by the room
/// registry and a clone held by a request handler observe the same state.
#[derive(Clone)]
pub struct SharedDoc {
    doc: Doc,
}

impl SharedDoc {
    /// Create an empty document with no tags and no history.
    pub fn new() -> Self {
        Self { doc: Doc::new() }
    }

    /// Apply a binary Yrs update (v1 encoding) onto this document.
    pub fn apply_update(&self, update: &[u8]) -> Result<(), EngineError> {
        let decoded = Update::decode_v1(update)
            .map_err(|e| EngineError::Decode(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(decoded)
            .map_err(|e| EngineError::Apply(e.to_string()))
    }

    /// Encode the full document state as a Yrs v1 update.
    pub fn encode(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Encode the full document state as portable base64 text.
    pub fn encode_text(&self) -> String {
        general_purpose::STANDARD.encode(self.encode())
    }

    /// Decode a portable base64 blob back into raw update bytes.
    pub fn decode_blob_text(blob: &str) -> Result<Vec<u8>, EngineError> {
        general_purpose::STANDARD
            .decode(blob)
            .map_err(|e| EngineError::Decode(e.to_string()))
    }

    /// Apply a portable base64 blob onto this document.
    pub fn apply_blob_text(&self, blob: &str) -> Result<(), EngineError> {
        let bytes = Self::decode_blob_text(blob)?;
        self.apply_update(&bytes)
    }

    /// Project the document to JSON: `{ tag: { elementId: value } }`.
    ///
    /// Returns `None` when the document holds no tag/elementId entries —
    /// callers treat that as "room has no data" and surface 404.
    pub fn to_json(&self) -> Option<JsonValue> {
        let txn = self.doc.transact();
        let root = txn.get_map(ROOT_MAP)?;
        let tags = match root.to_json(&txn) {
            Any::Map(tags) => tags,
            _ => return None,
        };

        let mut view = serde_json::Map::new();
        for (tag, value) in tags.iter() {
            // A tag whose map has been emptied is not data.
            if let Any::Map(entries) = value {
                if entries.is_empty() {
                    continue;
                }
            }
            view.insert(tag.clone(), any_to_json(value));
        }

        if view.is_empty() {
            None
        } else {
            Some(JsonValue::Object(view))
        }
    }

    /// Set the value stored at `(tag, element_id)`.
    pub fn set_entry(&self, tag: &str, element_id: &str, value: &JsonValue) {
        let mut txn = self.doc.transact_mut();
        let root = txn.get_or_insert_map(ROOT_MAP);
        let nested = match root.get(&txn, tag) {
            Some(Out::YMap(map)) => map,
            _ => root.insert(&mut txn, tag, MapPrelim::default()),
        };
        nested.insert(&mut txn, element_id, json_to_any(value));
    }

    /// Get the value stored at `(tag, element_id)`, if any.
    pub fn entry(&self, tag: &str, element_id: &str) -> Option<JsonValue> {
        let txn = self.doc.transact();
        let root = txn.get_map(ROOT_MAP)?;
        let nested = match root.get(&txn, tag) {
            Some(Out::YMap(map)) => map,
            _ => return None,
        };
        match nested.get(&txn, element_id) {
            Some(Out::Any(any)) => Some(any_to_json(&any)),
            Some(Out::YMap(map)) => Some(any_to_json(&map.to_json(&txn))),
            Some(_) | None => None,
        }
    }

    /// Remove the entry at `(tag, element_id)`. Returns whether it existed.
    pub fn remove_entry(&self, tag: &str, element_id: &str) -> bool {
        let mut txn = self.doc.transact_mut();
        let root = match txn.get_map(ROOT_MAP) {
            Some(root) => root,
            None => return false,
        };
        let nested = match root.get(&txn, tag) {
            Some(Out::YMap(map)) => map,
            _ => return false,
        };
        nested.remove(&mut txn, element_id).is_some()
    }

    /// All element ids stored under `tag`.
    pub fn element_ids(&self, tag: &str) -> Vec<String> {
        let txn = self.doc.transact();
        let root = match txn.get_map(ROOT_MAP) {
            Some(root) => root,
            None => return Vec::new(),
        };
        match root.get(&txn, tag) {
            Some(Out::YMap(map)) => map.keys(&txn).map(|k| k.to_string()).collect(),
            _ => Vec::new(),
        }
    }

    /// Clear all tag entries and repopulate from `json`, in place.
    ///
    /// `json` must be an object of `tag → { elementId → value }`. The
    /// document instance is mutated structurally, never replaced, so other
    /// holders of the same instance observe the new content.
    pub fn replace_from_json(&self, json: &JsonValue) -> Result<(), EngineError> {
        let tags = json
            .as_object()
            .ok_or_else(|| EngineError::InvalidJson("document data must be an object".into()))?;
        for (tag, entries) in tags {
            if !entries.is_object() {
                return Err(EngineError::InvalidJson(format!(
                    "tag '{tag}' must map to an object of element ids"
                )));
            }
        }

        let mut txn = self.doc.transact_mut();
        let root = txn.get_or_insert_map(ROOT_MAP);

        let existing: Vec<String> = root.keys(&txn).map(|k| k.to_string()).collect();
        for key in existing {
            root.remove(&mut txn, &key);
        }

        for (tag, entries) in tags {
            let nested = root.insert(&mut txn, tag.as_str(), MapPrelim::default());
            if let Some(entries) = entries.as_object() {
                for (element_id, value) in entries {
                    nested.insert(&mut txn, element_id.as_str(), json_to_any(value));
                }
            }
        }

        Ok(())
    }

    /// Restore this document's content from an encoded snapshot blob.
    ///
    /// The blob is decoded onto a scratch document, projected to JSON, and
    /// re-applied through [`SharedDoc::replace_from_json`] — snapshot
    /// restore always flows through the JSON projection so the existing
    /// live instance keeps its identity for every other holder.
    pub fn replace_from_snapshot(&self, blob: &str) -> Result<(), EngineError> {
        let scratch = SharedDoc::new();
        scratch.apply_blob_text(blob)?;
        let json = scratch
            .to_json()
            .unwrap_or_else(|| JsonValue::Object(serde_json::Map::new()));
        self.replace_from_json(&json)
    }
}

impl Default for SharedDoc {
    fn default() -> Self {
        Self::new()
    }
}

// ─── JSON ⇄ Any conversion ───────────────────────────────────────────────

/// Convert a JSON value into a Yrs `Any`.
///
/// Integers ride `Any::BigInt` so that projections round-trip exactly
/// (`5` stays `5`, not `5.0`).
fn json_to_any(value: &JsonValue) -> Any {
    match value {
        JsonValue::Null => Any::Null,
        JsonValue::Bool(b) => Any::Bool(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Any::BigInt(i)
            } else {
                Any::Number(n.as_f64().unwrap_or(0.0))
            }
        }
        JsonValue::String(s) => Any::String(s.clone().into()),
        JsonValue::Array(items) => {
            let converted: Vec<Any> = items.iter().map(json_to_any).collect();
            Any::Array(converted.into())
        }
        JsonValue::Object(fields) => {
            let converted: HashMap<String, Any> = fields
                .iter()
                .map(|(k, v)| (k.clone(), json_to_any(v)))
                .collect();
            Any::Map(Arc::new(converted))
        }
    }
}

/// Convert a Yrs `Any` into a JSON value.
fn any_to_json(any: &Any) -> JsonValue {
    match any {
        Any::Null | Any::Undefined => JsonValue::Null,
        Any::Bool(b) => JsonValue::Bool(*b),
        Any::Number(n) => serde_json::Number::from_f64(*n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Any::BigInt(i) => JsonValue::Number((*i).into()),
        Any::String(s) => JsonValue::String(s.to_string()),
        Any::Buffer(bytes) => JsonValue::Array(
            bytes.iter().map(|b| JsonValue::Number((*b).into())).collect(),
        ),
        Any::Array(items) => JsonValue::Array(items.iter().map(any_to_json).collect()),
        Any::Map(fields) => JsonValue::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), any_to_json(v)))
                .collect(),
        ),
    }
}
