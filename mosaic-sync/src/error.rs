//! Top-level error taxonomy for the admin subsystem.
//!
//! Every admin request resolves to one of these variants; the HTTP layer maps
//! them to status codes:
//!
//! | Variant       | Status | Meaning                                      |
//! |---------------|--------|----------------------------------------------|
//! | `Auth`        | 401    | Missing or mismatched admin token            |
//! | `Validation`  | 400    | Malformed request fields or undecodable blob |
//! | `NotFound`    | 404    | No snapshot / no document data for the room  |
//! | `Persistence` | 500    | Snapshot store read/write failure            |
//! | `Unexpected`  | 500    | Anything else caught at dispatch             |
//!
//! Drift between live and persisted state is reported as data, never as an
//! error. Crypto verification failures resolve to boolean `false` in
//! [`crate::auth`] and never surface here.

use crate::engine::EngineError;
use crate::store::StoreError;

/// Admin operation error.
#[derive(Debug, Clone)]
pub enum AdminError {
    /// Admin token missing or mismatched.
    Auth,
    /// Request field missing or malformed.
    Validation(String),
    /// Room has no snapshot or no document data.
    NotFound(String),
    /// Snapshot store failure.
    Persistence(String),
    /// Uncategorized failure.
    Unexpected(String),
}

impl std::fmt::Display for AdminError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdminError::Auth => write!(f, "Unauthorized"),
            AdminError::Validation(msg) => write!(f, "Validation error: {msg}"),
            AdminError::NotFound(msg) => write!(f, "Not found: {msg}"),
            AdminError::Persistence(msg) => write!(f, "Persistence error: {msg}"),
            AdminError::Unexpected(msg) => write!(f, "Unexpected error: {msg}"),
        }
    }
}

impl std::error::Error for AdminError {}

impl From<StoreError> for AdminError {
    fn from(e: StoreError) -> Self {
        AdminError::Persistence(e.to_string())
    }
}

impl From<EngineError> for AdminError {
    fn from(e: EngineError) -> Self {
        // Engine failures outside an explicit validation path mean the
        // persisted blob or live document is in a bad state.
        AdminError::Persistence(e.to_string())
    }
}

impl AdminError {
    /// HTTP status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            AdminError::Auth => 401,
            AdminError::Validation(_) => 400,
            AdminError::NotFound(_) => 404,
            AdminError::Persistence(_) => 500,
            AdminError::Unexpected(_) => 500,
        }
    }
}
