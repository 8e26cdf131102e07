//! Admin HTTP surface.
//!
//! Routes (room id rides the `?room=` query parameter):
//! ```text
//! GET  /admin/inspect              → inspect durable state
//! GET  /admin/raw-data             → raw persisted blob metadata
//! GET  /admin/live-compare         → live vs persisted diff
//! POST /admin/force-save-live      → persist the live document
//! POST /admin/force-reload-live    → reload live from snapshot
//! POST /admin/save-edited-data     → replace content from edited JSON
//! POST /admin/cleanup-orphans      → remove stale element entries
//! POST /admin/hard-reset           → GC merge history
//! POST /admin/restore-raw-document → restore a verbatim blob
//! POST /admin/remove-subscriber    → drop a relay registration
//! POST /admin/cleanup-sessions     → sweep expired sessions
//! ```
//!
//! Every non-OPTIONS request first passes the admin-token check: the token
//! arrives as `?token=` or in the `Authorization` header (bare or
//! `Bearer `-prefixed) and is compared in constant time. When no token is
//! configured the check is skipped — that deployment gap is logged loudly
//! at startup rather than papered over. All responses are JSON and carry
//! permissive CORS headers.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use subtle::ConstantTimeEq;

use crate::auth::SessionAuthenticator;
use crate::error::AdminError;
use crate::inspect;
use crate::recovery;
use crate::rooms::RoomRegistry;
use crate::store::{SnapshotStore, StoreConfig};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Admin token; `None` disables the auth check
    pub admin_token: Option<String>,
    /// Snapshot store directory
    pub storage_path: PathBuf,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8787".to_string(),
            admin_token: None,
            storage_path: PathBuf::from("mosaic_data"),
        }
    }
}

impl AdminConfig {
    /// Read configuration from `MOSAIC_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("MOSAIC_BIND_ADDR").unwrap_or(defaults.bind_addr),
            admin_token: std::env::var("MOSAIC_ADMIN_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
            storage_path: std::env::var("MOSAIC_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_path),
        }
    }
}

/// Shared handler state.
pub struct AdminState {
    pub store: Arc<SnapshotStore>,
    pub registry: Arc<RoomRegistry>,
    pub sessions: Arc<SessionAuthenticator>,
    admin_token: Option<String>,
}

impl AdminState {
    pub fn new(
        store: Arc<SnapshotStore>,
        registry: Arc<RoomRegistry>,
        sessions: Arc<SessionAuthenticator>,
        admin_token: Option<String>,
    ) -> Self {
        Self {
            store,
            registry,
            sessions,
            admin_token,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AdminQuery {
    room: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditBody {
    data: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrphanBody {
    tag: Option<String>,
    #[serde(default)]
    active_ids: Vec<String>,
    #[serde(default)]
    dry_run: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestoreBody {
    base64_document: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveSubscriberBody {
    consumer_room_id: Option<String>,
}

/// Build the admin router.
pub fn build_router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/admin/inspect", get(inspect_handler).options(preflight))
        .route("/admin/raw-data", get(raw_data_handler).options(preflight))
        .route("/admin/live-compare", get(live_compare_handler).options(preflight))
        .route("/admin/force-save-live", post(force_save_handler).options(preflight))
        .route("/admin/force-reload-live", post(force_reload_handler).options(preflight))
        .route("/admin/save-edited-data", post(save_edited_handler).options(preflight))
        .route("/admin/cleanup-orphans", post(cleanup_orphans_handler).options(preflight))
        .route("/admin/hard-reset", post(hard_reset_handler).options(preflight))
        .route(
            "/admin/restore-raw-document",
            post(restore_raw_handler).options(preflight),
        )
        .route(
            "/admin/remove-subscriber",
            post(remove_subscriber_handler).options(preflight),
        )
        .route(
            "/admin/cleanup-sessions",
            post(cleanup_sessions_handler).options(preflight),
        )
        .fallback(fallback_handler)
        .with_state(state)
}

// ─── Auth & response plumbing ────────────────────────────────────────────

/// Check the admin token. Skipped entirely when none is configured.
fn authorize(state: &AdminState, headers: &HeaderMap, query: &AdminQuery) -> Result<(), AdminError> {
    let expected = match &state.admin_token {
        Some(token) => token,
        None => return Ok(()),
    };

    let supplied = query.token.clone().or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.strip_prefix("Bearer ").unwrap_or(v).to_string())
    });

    match supplied {
        Some(supplied)
            if bool::from(supplied.as_bytes().ct_eq(expected.as_bytes())) =>
        {
            Ok(())
        }
        _ => Err(AdminError::Auth),
    }
}

/// Authorize and extract the target room id.
fn require_room(
    state: &AdminState,
    headers: &HeaderMap,
    query: &AdminQuery,
) -> Result<String, AdminError> {
    authorize(state, headers, query)?;
    match query.room.as_deref() {
        Some(room) if !room.is_empty() => Ok(room.to_string()),
        _ => Err(AdminError::Validation("room query parameter is required".into())),
    }
}

fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    let mut response = (status, Json(serde_json::to_value(body).unwrap_or_default())).into_response();
    apply_cors(response.headers_mut());
    response
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        if matches!(self, AdminError::Persistence(_) | AdminError::Unexpected(_)) {
            log::error!("Admin request failed: {self}");
        }
        let status =
            StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        json_response(status, &serde_json::json!({ "error": self.to_string() }))
    }
}

async fn preflight() -> Response {
    let mut response = StatusCode::OK.into_response();
    apply_cors(response.headers_mut());
    response
}

async fn fallback_handler(method: Method) -> Response {
    if method == Method::OPTIONS {
        preflight().await
    } else {
        AdminError::NotFound("no such route".into()).into_response()
    }
}

// ─── Handlers ────────────────────────────────────────────────────────────

async fn inspect_handler(
    State(state): State<Arc<AdminState>>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Response {
    let room = match require_room(&state, &headers, &query) {
        Ok(room) => room,
        Err(e) => return e.into_response(),
    };
    match inspect::inspect(&state.store, &state.registry, &room).await {
        Ok(report) => json_response(StatusCode::OK, &report),
        Err(e) => e.into_response(),
    }
}

async fn raw_data_handler(
    State(state): State<Arc<AdminState>>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Response {
    let room = match require_room(&state, &headers, &query) {
        Ok(room) => room,
        Err(e) => return e.into_response(),
    };
    match inspect::raw_data(&state.store, &room) {
        Ok(report) => json_response(StatusCode::OK, &report),
        Err(e) => e.into_response(),
    }
}

async fn live_compare_handler(
    State(state): State<Arc<AdminState>>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Response {
    let room = match require_room(&state, &headers, &query) {
        Ok(room) => room,
        Err(e) => return e.into_response(),
    };
    match inspect::live_vs_persisted(&state.store, &state.registry, &room).await {
        Ok(report) => json_response(StatusCode::OK, &report),
        Err(e) => e.into_response(),
    }
}

async fn force_save_handler(
    State(state): State<Arc<AdminState>>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Response {
    let room = match require_room(&state, &headers, &query) {
        Ok(room) => room,
        Err(e) => return e.into_response(),
    };
    match recovery::force_save_live(&state.store, &state.registry, &room).await {
        Ok(report) => json_response(StatusCode::OK, &report),
        Err(e) => e.into_response(),
    }
}

async fn force_reload_handler(
    State(state): State<Arc<AdminState>>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Response {
    let room = match require_room(&state, &headers, &query) {
        Ok(room) => room,
        Err(e) => return e.into_response(),
    };
    match recovery::force_reload_live(&state.store, &state.registry, &room).await {
        Ok(report) => json_response(StatusCode::OK, &report),
        Err(e) => e.into_response(),
    }
}

async fn save_edited_handler(
    State(state): State<Arc<AdminState>>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
    body: Option<Json<EditBody>>,
) -> Response {
    let room = match require_room(&state, &headers, &query) {
        Ok(room) => room,
        Err(e) => return e.into_response(),
    };
    let data = match body.and_then(|Json(b)| b.data) {
        Some(data) => data,
        None => {
            return AdminError::Validation("request body must contain a data field".into())
                .into_response()
        }
    };
    match recovery::save_edited_data(&state.store, &state.registry, &room, &data).await {
        // A live update whose persist step failed is surfaced as a 500
        // carrying the partial-failure report.
        Ok(report) if !report.persisted => {
            json_response(StatusCode::INTERNAL_SERVER_ERROR, &report)
        }
        Ok(report) => json_response(StatusCode::OK, &report),
        Err(e) => e.into_response(),
    }
}

async fn cleanup_orphans_handler(
    State(state): State<Arc<AdminState>>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
    body: Option<Json<OrphanBody>>,
) -> Response {
    let room = match require_room(&state, &headers, &query) {
        Ok(room) => room,
        Err(e) => return e.into_response(),
    };
    let body = match body {
        Some(Json(body)) => body,
        None => {
            return AdminError::Validation("request body is required".into()).into_response()
        }
    };
    let tag = match body.tag {
        Some(tag) if !tag.is_empty() => tag,
        _ => return AdminError::Validation("tag is required".into()).into_response(),
    };
    match recovery::cleanup_orphans(
        &state.store,
        &state.registry,
        &room,
        &tag,
        &body.active_ids,
        body.dry_run,
    )
    .await
    {
        Ok(report) if report.persisted == Some(false) => {
            json_response(StatusCode::INTERNAL_SERVER_ERROR, &report)
        }
        Ok(report) => json_response(StatusCode::OK, &report),
        Err(e) => e.into_response(),
    }
}

async fn hard_reset_handler(
    State(state): State<Arc<AdminState>>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Response {
    let room = match require_room(&state, &headers, &query) {
        Ok(room) => room,
        Err(e) => return e.into_response(),
    };
    match recovery::hard_reset(&state.store, &state.registry, &room).await {
        Ok(report) => json_response(StatusCode::OK, &report),
        Err(e) => e.into_response(),
    }
}

async fn restore_raw_handler(
    State(state): State<Arc<AdminState>>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
    body: Option<Json<RestoreBody>>,
) -> Response {
    let room = match require_room(&state, &headers, &query) {
        Ok(room) => room,
        Err(e) => return e.into_response(),
    };
    let blob = match body.and_then(|Json(b)| b.base64_document) {
        Some(blob) if !blob.is_empty() => blob,
        _ => {
            return AdminError::Validation("base64Document is required".into()).into_response()
        }
    };
    match recovery::restore_raw_document(&state.store, &state.registry, &room, &blob).await {
        Ok(report) => json_response(StatusCode::OK, &report),
        Err(e) => e.into_response(),
    }
}

async fn remove_subscriber_handler(
    State(state): State<Arc<AdminState>>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
    body: Option<Json<RemoveSubscriberBody>>,
) -> Response {
    let room = match require_room(&state, &headers, &query) {
        Ok(room) => room,
        Err(e) => return e.into_response(),
    };
    let consumer = match body.and_then(|Json(b)| b.consumer_room_id) {
        Some(consumer) if !consumer.is_empty() => consumer,
        _ => {
            return AdminError::Validation("consumerRoomId is required".into()).into_response()
        }
    };
    match recovery::remove_subscriber(&state.store, &state.registry, &room, &consumer).await {
        Ok(report) => json_response(StatusCode::OK, &report),
        Err(e) => e.into_response(),
    }
}

async fn cleanup_sessions_handler(
    State(state): State<Arc<AdminState>>,
    Query(query): Query<AdminQuery>,
    headers: HeaderMap,
) -> Response {
    // Session maintenance is not room-scoped; only the token check applies.
    if let Err(e) = authorize(&state, &headers, &query) {
        return e.into_response();
    }
    let removed = state.sessions.cleanup_expired_sessions();
    json_response(StatusCode::OK, &serde_json::json!({ "removed": removed }))
}

// ─── Server entry ────────────────────────────────────────────────────────

/// Open the store and serve the admin surface until the process exits.
pub async fn serve(config: AdminConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.admin_token.is_none() {
        log::warn!(
            "No admin token configured — the admin surface is UNPROTECTED. \
             Set MOSAIC_ADMIN_TOKEN in any real deployment."
        );
    }

    let store = Arc::new(SnapshotStore::open(StoreConfig {
        path: config.storage_path.clone(),
        ..StoreConfig::default()
    })?);
    let registry = Arc::new(RoomRegistry::new(store.clone()));
    let sessions = Arc::new(SessionAuthenticator::new());
    let state = Arc::new(AdminState::new(
        store,
        registry,
        sessions,
        config.admin_token.clone(),
    ));

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    log::info!("Admin server listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
