//! RocksDB-backed snapshot store.
//!
//! Column families:
//! - `snapshots`   — Full document snapshots as base64 text, keyed by room id
//! - `meta`        — Snapshot metadata (bincode: timestamps, sizes)
//! - `subscribers` — Per-room relay registrations (JSON list)
//! - `references`  — Per-room shared reference lists (JSON, opaque)
//! - `permissions` — Per-room shared permission lists (JSON, opaque)
//!
//! Snapshot and metadata rows are written together in one `WriteBatch`, so
//! a snapshot is never observable without its metadata (and never partially
//! written). Values are LZ4-compressed by RocksDB at the column-family
//! level.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Column family names.
const CF_SNAPSHOTS: &str = "snapshots";
const CF_META: &str = "meta";
const CF_SUBSCRIBERS: &str = "subscribers";
const CF_REFERENCES: &str = "references";
const CF_PERMISSIONS: &str = "permissions";

/// All column family names for initialization.
const COLUMN_FAMILIES: &[&str] = &[
    CF_SNAPSHOTS,
    CF_META,
    CF_SUBSCRIBERS,
    CF_REFERENCES,
    CF_PERMISSIONS,
];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("mosaic_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, temp directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// Metadata stored alongside each snapshot blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Room identifier
    pub room_id: String,
    /// First-save timestamp (seconds since epoch)
    pub created_at: u64,
    /// Last-save timestamp (seconds since epoch)
    pub saved_at: u64,
    /// Length of the stored base64 text
    pub blob_len: u64,
    /// Length of the decoded document update in bytes
    pub doc_bytes: u64,
}

impl SnapshotMetadata {
    fn new(room_id: &str) -> Self {
        let now = now_secs();
        Self {
            room_id: room_id.to_string(),
            created_at: now,
            saved_at: now,
            blob_len: 0,
            doc_bytes: 0,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
        Ok(meta)
    }
}

/// A loaded snapshot row.
#[derive(Debug, Clone)]
pub struct SnapshotRecord {
    pub room_id: String,
    /// Base64 text of the encoded document state
    pub blob: String,
    /// Last-save timestamp (seconds since epoch)
    pub saved_at: u64,
}

/// A relay registration stored in a room's subscriber list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    /// Room id of the consuming relay
    pub consumer_room_id: String,
    /// Registration timestamp (seconds since epoch)
    pub registered_at: u64,
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// RocksDB internal error
    DatabaseError(String),
    /// Serialization failed
    SerializationError(String),
    /// Deserialization failed
    DeserializationError(String),
    /// Stored value was not valid UTF-8 / JSON
    CorruptValue(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::CorruptValue(e) => write!(f, "Corrupt value: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

/// RocksDB-backed per-room snapshot store.
pub struct SnapshotStore {
    /// RocksDB instance (single-threaded mode — concurrency via tokio)
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl SnapshotStore {
    /// Open the store at the configured path, creating it if missing.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(&config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        Ok(Self { db, config })
    }

    /// Column family options: point-lookup workload, LZ4 values.
    fn cf_options(config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(2);
        opts.optimize_for_point_lookup(config.block_cache_size as u64);

        opts
    }

    // ─── Snapshots ────────────────────────────────────────────────────

    /// Upsert a room's snapshot blob (base64 text) and its metadata.
    ///
    /// The two rows go into one atomic write batch. Last write wins.
    pub fn save_snapshot(
        &self,
        room_id: &str,
        blob: &str,
        doc_bytes: u64,
    ) -> Result<SnapshotMetadata, StoreError> {
        let cf_snap = self.cf(CF_SNAPSHOTS)?;
        let cf_meta = self.cf(CF_META)?;

        let mut meta = self
            .load_metadata(room_id)?
            .unwrap_or_else(|| SnapshotMetadata::new(room_id));
        meta.saved_at = now_secs();
        meta.blob_len = blob.len() as u64;
        meta.doc_bytes = doc_bytes;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_snap, room_id.as_bytes(), blob.as_bytes());
        batch.put_cf(&cf_meta, room_id.as_bytes(), meta.encode()?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        Ok(meta)
    }

    /// Load a room's snapshot, if one exists.
    pub fn load_snapshot(&self, room_id: &str) -> Result<Option<SnapshotRecord>, StoreError> {
        let cf = self.cf(CF_SNAPSHOTS)?;
        let blob = match self.db.get_cf(&cf, room_id.as_bytes())? {
            Some(bytes) => String::from_utf8(bytes)
                .map_err(|e| StoreError::CorruptValue(e.to_string()))?,
            None => return Ok(None),
        };
        let saved_at = self
            .load_metadata(room_id)?
            .map(|m| m.saved_at)
            .unwrap_or_default();
        Ok(Some(SnapshotRecord {
            room_id: room_id.to_string(),
            blob,
            saved_at,
        }))
    }

    /// Load a room's snapshot metadata, if any.
    pub fn load_metadata(&self, room_id: &str) -> Result<Option<SnapshotMetadata>, StoreError> {
        let cf = self.cf(CF_META)?;
        match self.db.get_cf(&cf, room_id.as_bytes())? {
            Some(bytes) => Ok(Some(SnapshotMetadata::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Check whether a room has a persisted snapshot.
    pub fn snapshot_exists(&self, room_id: &str) -> Result<bool, StoreError> {
        let cf = self.cf(CF_SNAPSHOTS)?;
        Ok(self.db.get_cf(&cf, room_id.as_bytes())?.is_some())
    }

    /// Delete a room's snapshot and metadata.
    pub fn delete_snapshot(&self, room_id: &str) -> Result<(), StoreError> {
        let cf_snap = self.cf(CF_SNAPSHOTS)?;
        let cf_meta = self.cf(CF_META)?;
        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_snap, room_id.as_bytes());
        batch.delete_cf(&cf_meta, room_id.as_bytes());
        self.db.write(batch)?;
        Ok(())
    }

    // ─── Subscribers ──────────────────────────────────────────────────

    /// Load a room's subscriber list (empty when none stored).
    pub fn load_subscribers(&self, room_id: &str) -> Result<Vec<Subscriber>, StoreError> {
        let cf = self.cf(CF_SUBSCRIBERS)?;
        match self.db.get_cf(&cf, room_id.as_bytes())? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::CorruptValue(e.to_string())),
            None => Ok(Vec::new()),
        }
    }

    /// Replace a room's subscriber list.
    pub fn store_subscribers(
        &self,
        room_id: &str,
        subscribers: &[Subscriber],
    ) -> Result<(), StoreError> {
        let cf = self.cf(CF_SUBSCRIBERS)?;
        let encoded = serde_json::to_vec(subscribers)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        self.db.put_cf(&cf, room_id.as_bytes(), encoded)?;
        Ok(())
    }

    // ─── Shared references / permissions ──────────────────────────────

    /// Load a room's shared reference list (opaque JSON, `[]` when absent).
    pub fn load_references(&self, room_id: &str) -> Result<serde_json::Value, StoreError> {
        self.load_json_list(CF_REFERENCES, room_id)
    }

    /// Replace a room's shared reference list.
    pub fn store_references(
        &self,
        room_id: &str,
        references: &serde_json::Value,
    ) -> Result<(), StoreError> {
        self.store_json_list(CF_REFERENCES, room_id, references)
    }

    /// Load a room's shared permission list (opaque JSON, `[]` when absent).
    pub fn load_permissions(&self, room_id: &str) -> Result<serde_json::Value, StoreError> {
        self.load_json_list(CF_PERMISSIONS, room_id)
    }

    /// Replace a room's shared permission list.
    pub fn store_permissions(
        &self,
        room_id: &str,
        permissions: &serde_json::Value,
    ) -> Result<(), StoreError> {
        self.store_json_list(CF_PERMISSIONS, room_id, permissions)
    }

    fn load_json_list(&self, cf_name: &str, room_id: &str) -> Result<serde_json::Value, StoreError> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(&cf, room_id.as_bytes())? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::CorruptValue(e.to_string())),
            None => Ok(serde_json::Value::Array(Vec::new())),
        }
    }

    fn store_json_list(
        &self,
        cf_name: &str,
        room_id: &str,
        value: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let cf = self.cf(cf_name)?;
        let encoded = serde_json::to_vec(value)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        self.db.put_cf(&cf, room_id.as_bytes(), encoded)?;
        Ok(())
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }
}

/// Seconds since the Unix epoch.
pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use uuid::Uuid;

    fn temp_db_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("mosaic_test_rocks_{name}_{}", Uuid::new_v4()))
    }

    fn cleanup(path: &Path) {
        let _ = fs::remove_dir_all(path);
    }

    #[test]
    fn test_store_open_close() {
        let path = temp_db_path("open_close");
        let store = SnapshotStore::open(StoreConfig::for_testing(&path)).unwrap();
        assert!(store.path().exists());
        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_snapshot_save_load() {
        let path = temp_db_path("snapshot");
        let store = SnapshotStore::open(StoreConfig::for_testing(&path)).unwrap();

        let meta = store.save_snapshot("room-1", "AAEC", 3).unwrap();
        assert_eq!(meta.room_id, "room-1");
        assert_eq!(meta.blob_len, 4);
        assert_eq!(meta.doc_bytes, 3);
        assert!(meta.saved_at > 0);

        let record = store.load_snapshot("room-1").unwrap().unwrap();
        assert_eq!(record.blob, "AAEC");
        assert_eq!(record.saved_at, meta.saved_at);

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_snapshot_missing_room() {
        let path = temp_db_path("missing");
        let store = SnapshotStore::open(StoreConfig::for_testing(&path)).unwrap();

        assert!(store.load_snapshot("nope").unwrap().is_none());
        assert!(!store.snapshot_exists("nope").unwrap());

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_snapshot_upsert_last_write_wins() {
        let path = temp_db_path("upsert");
        let store = SnapshotStore::open(StoreConfig::for_testing(&path)).unwrap();

        let first = store.save_snapshot("room-1", "old", 10).unwrap();
        let second = store.save_snapshot("room-1", "newer", 20).unwrap();

        // created_at is preserved from the first save.
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.doc_bytes, 20);

        let record = store.load_snapshot("room-1").unwrap().unwrap();
        assert_eq!(record.blob, "newer");

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_delete_snapshot() {
        let path = temp_db_path("delete");
        let store = SnapshotStore::open(StoreConfig::for_testing(&path)).unwrap();

        store.save_snapshot("room-1", "blob", 4).unwrap();
        assert!(store.snapshot_exists("room-1").unwrap());

        store.delete_snapshot("room-1").unwrap();
        assert!(!store.snapshot_exists("room-1").unwrap());
        assert!(store.load_metadata("room-1").unwrap().is_none());

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_subscribers_roundtrip() {
        let path = temp_db_path("subs");
        let store = SnapshotStore::open(StoreConfig::for_testing(&path)).unwrap();

        assert!(store.load_subscribers("room-1").unwrap().is_empty());

        let subs = vec![
            Subscriber { consumer_room_id: "relay-a".into(), registered_at: 100 },
            Subscriber { consumer_room_id: "relay-b".into(), registered_at: 200 },
        ];
        store.store_subscribers("room-1", &subs).unwrap();

        let loaded = store.load_subscribers("room-1").unwrap();
        assert_eq!(loaded, subs);

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_references_and_permissions_default_empty() {
        let path = temp_db_path("refs");
        let store = SnapshotStore::open(StoreConfig::for_testing(&path)).unwrap();

        assert_eq!(store.load_references("room-1").unwrap(), json!([]));
        assert_eq!(store.load_permissions("room-1").unwrap(), json!([]));

        store
            .store_references("room-1", &json!([{"ref": "doc-7"}]))
            .unwrap();
        store
            .store_permissions("room-1", &json!(["admin:alice"]))
            .unwrap();

        assert_eq!(store.load_references("room-1").unwrap(), json!([{"ref": "doc-7"}]));
        assert_eq!(store.load_permissions("room-1").unwrap(), json!(["admin:alice"]));

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_rooms_are_isolated() {
        let path = temp_db_path("isolation");
        let store = SnapshotStore::open(StoreConfig::for_testing(&path)).unwrap();

        store.save_snapshot("room-a", "blob-a", 1).unwrap();
        store.save_snapshot("room-b", "blob-b", 2).unwrap();

        assert_eq!(store.load_snapshot("room-a").unwrap().unwrap().blob, "blob-a");
        assert_eq!(store.load_snapshot("room-b").unwrap().unwrap().blob, "blob-b");

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_persists_across_reopen() {
        let path = temp_db_path("reopen");
        {
            let store = SnapshotStore::open(StoreConfig::for_testing(path.clone())).unwrap();
            store.save_snapshot("room-1", "durable", 7).unwrap();
        }
        {
            let store = SnapshotStore::open(StoreConfig::for_testing(path.clone())).unwrap();
            let record = store.load_snapshot("room-1").unwrap().unwrap();
            assert_eq!(record.blob, "durable");
        }
        cleanup(&path);
    }

    #[test]
    fn test_store_config_default() {
        let config = StoreConfig::default();
        assert_eq!(config.block_cache_size, 64 * 1024 * 1024);
        assert_eq!(config.bloom_filter_bits, 10);
        assert!(!config.sync_writes);
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::DatabaseError("test".into());
        assert!(err.to_string().contains("Database error"));

        let err = StoreError::CorruptValue("bad utf8".into());
        assert!(err.to_string().contains("Corrupt value"));
    }
}
