//! Durable per-room storage.
//!
//! ```text
//! ┌──────────────┐    encode → base64    ┌───────────────┐
//! │ SharedDoc    │ ────────────────────► │ SnapshotStore │
//! │ (in-memory)  │                       │ (RocksDB)     │
//! └──────────────┘                       └──────┬────────┘
//!                                               │ column families
//!                                               ▼
//!                         ┌────────────────────────────────────────┐
//!                         │ CF "snapshots"   — blob text per room  │
//!                         │ CF "meta"        — saved-at, sizes     │
//!                         │ CF "subscribers" — relay registrations │
//!                         │ CF "references"  — shared references   │
//!                         │ CF "permissions" — shared permissions  │
//!                         └────────────────────────────────────────┘
//! ```
//!
//! A snapshot row is only ever written from a complete document encode, as
//! one atomic batch with its metadata — a reader never observes a partial
//! snapshot.

pub mod rocks;

pub use rocks::{
    SnapshotMetadata, SnapshotRecord, SnapshotStore, StoreConfig, StoreError, Subscriber,
};
