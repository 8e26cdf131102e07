//! Process-wide room registry.
//!
//! Each room owns exactly one live [`SharedDoc`] per process. The registry
//! constructs it on first access, hydrating from the persisted snapshot when
//! one exists, and hands out the same handle afterwards — never two live
//! instances for the same room id.
//!
//! Every admin operation against a room serializes on the room's gate so
//! that concurrent calls cannot interleave partial mutations. Eviction is
//! explicit only; no automatic policy is defined here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::engine::SharedDoc;
use crate::error::AdminError;
use crate::store::SnapshotStore;

/// A room's live state: the single authoritative document plus bookkeeping.
pub struct RoomHandle {
    room_id: String,
    doc: SharedDoc,
    /// Serializes admin operations against this room.
    gate: Mutex<()>,
    /// Live client connections (maintained by the sync transport).
    connections: AtomicU64,
}

impl RoomHandle {
    fn new(room_id: &str, doc: SharedDoc) -> Self {
        Self {
            room_id: room_id.to_string(),
            doc,
            gate: Mutex::new(()),
            connections: AtomicU64::new(0),
        }
    }

    /// The room identifier.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// The live document.
    pub fn doc(&self) -> &SharedDoc {
        &self.doc
    }

    /// Acquire this room's operation gate.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    /// Record a client connection.
    pub fn connect(&self) -> u64 {
        self.connections.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Record a client disconnection.
    pub fn disconnect(&self) -> u64 {
        let prev = self.connections.fetch_sub(1, Ordering::SeqCst);
        prev.saturating_sub(1)
    }

    /// Current live connection count.
    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Registry of live rooms, keyed by room id.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<RoomHandle>>>,
    store: Arc<SnapshotStore>,
}

impl RoomRegistry {
    /// Create a registry backed by the given snapshot store.
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Get the room's live document handle, constructing and hydrating it
    /// on first access.
    ///
    /// A fresh room starts from an empty document; if a snapshot exists,
    /// its decoded blob is applied before the handle becomes visible.
    pub async fn get_live(&self, room_id: &str) -> Result<Arc<RoomHandle>, AdminError> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(handle) = rooms.get(room_id) {
                return Ok(handle.clone());
            }
        }

        // Slow path: write lock to create
        let mut rooms = self.rooms.write().await;
        // Double-check after acquiring write lock
        if let Some(handle) = rooms.get(room_id) {
            return Ok(handle.clone());
        }

        let doc = SharedDoc::new();
        if let Some(snapshot) = self.store.load_snapshot(room_id)? {
            doc.apply_blob_text(&snapshot.blob).map_err(|e| {
                AdminError::Persistence(format!(
                    "room {room_id}: snapshot failed to hydrate: {e}"
                ))
            })?;
            log::info!(
                "Hydrated room {room_id} from snapshot ({} chars)",
                snapshot.blob.len()
            );
        }

        let handle = Arc::new(RoomHandle::new(room_id, doc));
        rooms.insert(room_id.to_string(), handle.clone());
        Ok(handle)
    }

    /// Look up a room without constructing it.
    pub async fn get(&self, room_id: &str) -> Option<Arc<RoomHandle>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Live connection count for a room (0 when the room is not resident).
    pub async fn connection_count(&self, room_id: &str) -> u64 {
        match self.get(room_id).await {
            Some(handle) => handle.connection_count(),
            None => 0,
        }
    }

    /// Drop a room's live state. The next `get_live` rebuilds it from the
    /// snapshot. Callers decide when eviction is safe; the registry imposes
    /// no policy of its own.
    pub async fn evict(&self, room_id: &str) -> bool {
        self.rooms.write().await.remove(room_id).is_some()
    }

    /// Number of resident rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// The backing snapshot store.
    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;
    use serde_json::json;
    use tempfile::tempdir;

    fn make_registry(dir: &std::path::Path) -> RoomRegistry {
        let store =
            Arc::new(SnapshotStore::open(StoreConfig::for_testing(dir.join("db"))).unwrap());
        RoomRegistry::new(store)
    }

    #[tokio::test]
    async fn test_get_live_returns_same_instance() {
        let dir = tempdir().unwrap();
        let registry = make_registry(dir.path());

        let a = registry.get_live("room-1").await.unwrap();
        let b = registry.get_live("room-1").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_rooms_are_independent() {
        let dir = tempdir().unwrap();
        let registry = make_registry(dir.path());

        let a = registry.get_live("room-a").await.unwrap();
        let b = registry.get_live("room-b").await.unwrap();

        a.doc().set_entry("can-move", "x", &json!(1));
        assert!(b.doc().to_json().is_none());
        assert_eq!(registry.room_count().await, 2);
    }

    #[tokio::test]
    async fn test_hydrates_from_snapshot() {
        let dir = tempdir().unwrap();
        let registry = make_registry(dir.path());

        let source = SharedDoc::new();
        source.set_entry("can-move", "box", &json!({"x": 3}));
        registry
            .store()
            .save_snapshot("room-1", &source.encode_text(), source.encode().len() as u64)
            .unwrap();

        let handle = registry.get_live("room-1").await.unwrap();
        assert_eq!(
            handle.doc().to_json().unwrap(),
            json!({"can-move": {"box": {"x": 3}}})
        );
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_surfaces_error() {
        let dir = tempdir().unwrap();
        let registry = make_registry(dir.path());

        registry
            .store()
            .save_snapshot("room-1", "!!!not-base64!!!", 0)
            .unwrap();

        let err = registry.get_live("room-1").await.unwrap_err();
        assert!(matches!(err, AdminError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_evict_and_rehydrate() {
        let dir = tempdir().unwrap();
        let registry = make_registry(dir.path());

        let handle = registry.get_live("room-1").await.unwrap();
        handle.doc().set_entry("can-move", "a", &json!(1));

        // Persist, evict, reload: content survives through the store.
        registry
            .store()
            .save_snapshot(
                "room-1",
                &handle.doc().encode_text(),
                handle.doc().encode().len() as u64,
            )
            .unwrap();
        assert!(registry.evict("room-1").await);
        assert!(!registry.evict("room-1").await);

        let reloaded = registry.get_live("room-1").await.unwrap();
        assert!(!Arc::ptr_eq(&handle, &reloaded));
        assert_eq!(
            reloaded.doc().to_json().unwrap(),
            json!({"can-move": {"a": 1}})
        );
    }

    #[tokio::test]
    async fn test_connection_counter() {
        let dir = tempdir().unwrap();
        let registry = make_registry(dir.path());

        assert_eq!(registry.connection_count("room-1").await, 0);

        let handle = registry.get_live("room-1").await.unwrap();
        assert_eq!(handle.connect(), 1);
        assert_eq!(handle.connect(), 2);
        assert_eq!(registry.connection_count("room-1").await, 2);
        assert_eq!(handle.disconnect(), 1);
        assert_eq!(registry.connection_count("room-1").await, 1);
    }
}
