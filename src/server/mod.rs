//! Server-side modules for the todolist sync server.

pub mod auth;
pub mod connection;
pub mod hub;
pub mod storage;

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

pub use auth::{ApiKeyEntry, ApiKeyStore, AuthUser};
pub use hub::SyncHub;
pub use storage::{CollectionStorage, ServerStorageError};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub api_keys: Arc<ApiKeyStore>,
    pub storage: Arc<Mutex<CollectionStorage>>,
    pub hub: Arc<SyncHub>,
}

impl AppState {
    pub fn new(api_keys: ApiKeyStore, storage: CollectionStorage) -> Self {
        Self {
            api_keys: Arc::new(api_keys),
            storage: Arc::new(Mutex::new(storage)),
            hub: Arc::new(SyncHub::new()),
        }
    }
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint (no auth required)
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Current user response
#[derive(Serialize)]
struct MeResponse {
    user_id: String,
}

/// Get current user info (auth required)
async fn me(Extension(user): Extension<AuthUser>) -> Json<MeResponse> {
    Json(MeResponse {
        user_id: user.user_id,
    })
}

#[derive(Deserialize)]
struct SyncParams {
    key: String,
}

/// WebSocket endpoint. Browsers and tungstenite clients cannot set
/// headers on the upgrade, so the key travels in the query string.
async fn sync_ws(
    ws: WebSocketUpgrade,
    Query(params): Query<SyncParams>,
    State(state): State<AppState>,
) -> Response {
    match state.api_keys.validate(&params.key) {
        Some(user) => ws
            .on_upgrade(move |socket| connection::serve_connection(socket, user, state))
            .into_response(),
        None => auth::unauthorized("invalid_key", "Invalid API key"),
    }
}

/// Builds the server router.
pub fn router(state: AppState) -> Router {
    // Public routes (no auth)
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/sync", get(sync_ws));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/me", get(me))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
