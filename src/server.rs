//! HTTP query endpoint.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/api/v1/search?q=<text>` | Sync (if enabled), query, return display paths |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! A successful search answers `200 text/plain` with one display path per
//! line, e.g.:
//!
//! ```text
//! D../report.pdf
//! D../notes.txt
//! ```
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `search_failed` (500).
//!
//! # Cancellation
//!
//! Each request runs its sync pass and query on a spawned task, so a client
//! that disconnects mid-request does not abort the pass halfway.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::ingest::Orchestrator;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

/// Build the router around an existing orchestrator.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/search", get(handle_search))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { orchestrator })
}

/// Start the server on `[server].bind` and run until the process exits.
///
/// Starts the periodic background sync as well when
/// `[sync].interval_secs` is non-zero.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let orchestrator = Arc::new(Orchestrator::from_config(config)?);

    let _background = (config.sync.interval_secs > 0).then(|| {
        tracing::info!(
            interval_secs = config.sync.interval_secs,
            "background sync enabled"
        );
        orchestrator.spawn_background_sync(Duration::from_secs(config.sync.interval_secs))
    });

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(
        addr = %config.server.bind,
        provider = orchestrator.provider_name(),
        "search server listening"
    );
    axum::serve(listener, router(orchestrator)).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn search_failed(message: impl std::fmt::Display) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "search_failed".to_string(),
        message: format!("Search failed: {}", message),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /api/v1/search ============

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
}

async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, AppError> {
    let query = params.q.trim().to_string();
    if query.is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let orchestrator = Arc::clone(&state.orchestrator);
    let items = tokio::spawn(async move { orchestrator.query(&query).await })
        .await
        .map_err(search_failed)?
        .map_err(search_failed)?;

    let body = items
        .iter()
        .map(|item| item.display_path.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response())
}
