//! # mosaic-sync — document reconciliation & recovery for shared page state
//!
//! Many browsers collaboratively edit small pieces of per-element state
//! through a shared CRDT document. This crate keeps each room's in-memory
//! document consistent with its durable snapshot, exposes diagnostic
//! comparison between the two, performs safe destructive maintenance, and
//! gates the privileged surface behind signed sessions.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   admin token    ┌──────────────┐
//! │ Admin HTTP  │ ───────────────► │ Recovery /   │
//! │ (axum)      │                  │ Inspector    │
//! └──────┬──────┘                  └──────┬───────┘
//!        │ signed actions                 │
//!        ▼                                ▼
//! ┌─────────────┐                  ┌──────────────┐
//! │ Session     │                  │ RoomRegistry │
//! │ Auth        │                  │ (live docs)  │
//! └─────────────┘                  └──────┬───────┘
//!                                         │ encode / hydrate
//!                                         ▼
//!                                  ┌──────────────┐
//!                                  │ SnapshotStore│
//!                                  │ (RocksDB)    │
//!                                  └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`engine`] — narrow wrapper over the Yrs CRDT document
//! - [`store`] — RocksDB-backed per-room snapshot store
//! - [`rooms`] — one live document per room, per-room operation gate
//! - [`inspect`] — durable-state views and live-vs-persisted drift checks
//! - [`recovery`] — force save/reload, orphan cleanup, history GC, restore
//! - [`auth`] — signature verification, sessions, nonce replay protection
//! - [`admin`] — HTTP surface wiring it all together

pub mod admin;
pub mod auth;
pub mod engine;
pub mod error;
pub mod inspect;
pub mod recovery;
pub mod rooms;
pub mod store;

// Re-exports for convenience
pub use admin::{build_router, AdminConfig, AdminState};
pub use auth::{
    verify_signature, Session, SessionAuthenticator, SignatureAlgorithm, SignedAction,
};
pub use engine::{EngineError, SharedDoc};
pub use error::AdminError;
pub use inspect::{InspectReport, LiveCompareReport, RawDataReport};
pub use recovery::{
    EditReport, OrphanReport, ReloadReport, ResetReport, RestoreReport, SaveReport,
    SubscriberReport,
};
pub use rooms::{RoomHandle, RoomRegistry};
pub use store::{
    SnapshotMetadata, SnapshotRecord, SnapshotStore, StoreConfig, StoreError, Subscriber,
};
