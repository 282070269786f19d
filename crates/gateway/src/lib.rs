//! HTTP gateway for Agentry.
//!
//! Exposes the configuration CRUD and run/continue endpoints over Axum.
//! All errors leave the API as `{"detail": "<text>"}` with a meaningful
//! status code; store errors map onto 404/409/422 where the cause is a
//! missing row, a name collision, or a dangling reference.

pub mod api;

use agentry_core::error::StoreError;
use agentry_engine::Engine;
use agentry_store::SqliteStore;
use axum::{
    Router,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Shared application state: the configuration store and the assembled
/// execution engine.
pub struct AppState {
    pub store: Arc<SqliteStore>,
    pub engine: Engine,
}

pub type SharedState = Arc<AppState>;

/// Error payload shape used by every endpoint.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

/// A status code plus human-readable detail, convertible from store
/// errors so handlers can use `?`.
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                detail: self.detail,
            }),
        )
            .into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::Duplicate { .. } => StatusCode::CONFLICT,
            StoreError::InvalidReference(_) => StatusCode::UNPROCESSABLE_ENTITY,
            StoreError::Storage(_) | StoreError::QueryFailed(_) | StoreError::MigrationFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            detail: err.to_string(),
        }
    }
}

pub(crate) fn not_found(kind: &str) -> ApiError {
    ApiError {
        status: StatusCode::NOT_FOUND,
        detail: format!("{kind} not found"),
    }
}

pub(crate) fn unprocessable(detail: impl Into<String>) -> ApiError {
    ApiError {
        status: StatusCode::UNPROCESSABLE_ENTITY,
        detail: detail.into(),
    }
}

/// Build the full router. `cors` enables a permissive CORS policy for
/// browser-based configuration frontends.
pub fn build_router(state: SharedState, cors: bool) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .merge(api::api_router(state));

    if cors {
        router = router.layer(CorsLayer::permissive());
    }
    router.layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Bind and serve until the process is stopped.
pub async fn serve(
    host: &str,
    port: u16,
    state: SharedState,
    cors: bool,
) -> Result<(), std::io::Error> {
    let addr = format!("{host}:{port}");
    let app = build_router(state, cors);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
