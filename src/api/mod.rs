//! HTTP + WebSocket surface for warmup control, send limits, and dispatch.

pub mod routes;
pub mod ws;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use crate::dispatch::DispatchPipeline;
use crate::error::{DatabaseError, LedgerError, WarmupError};
use crate::warmup::WarmupScheduler;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<WarmupScheduler>,
    pub pipeline: Arc<DispatchPipeline>,
}

/// Build the Axum router with all REST and WebSocket routes.
pub fn api_routes(scheduler: Arc<WarmupScheduler>, pipeline: Arc<DispatchPipeline>) -> Router {
    let state = AppState {
        scheduler,
        pipeline,
    };

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/warmup/schedules", get(routes::list_schedules))
        .route("/api/warmup/{account_id}/start", post(routes::start_warmup))
        .route(
            "/api/warmup/schedules/{id}",
            get(routes::get_schedule).delete(routes::remove_schedule),
        )
        .route("/api/warmup/schedules/{id}/pause", post(routes::pause_schedule))
        .route("/api/warmup/schedules/{id}/resume", post(routes::resume_schedule))
        .route("/api/accounts/{account_id}/send-limit", get(routes::send_limit))
        .route("/api/accounts/{account_id}/ledger", get(routes::ledger_history))
        .route("/api/accounts/{account_id}/sends", post(routes::record_sends))
        .route("/api/accounts/{account_id}/signals", post(routes::record_signal))
        .route("/ws/dispatch", get(ws::dispatch_ws))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `{"error": ...}` body with the given status.
pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

impl IntoResponse for WarmupError {
    fn into_response(self) -> Response {
        let status = match &self {
            WarmupError::NotFound { .. } | WarmupError::AccountNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            WarmupError::InvalidPolicy(_) => StatusCode::BAD_REQUEST,
            WarmupError::InvalidTransition { .. } => StatusCode::CONFLICT,
            WarmupError::Ledger(LedgerError::DayClosed { .. }) => StatusCode::CONFLICT,
            WarmupError::Database(DatabaseError::Constraint(_)) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
        }
        error_response(status, self.to_string())
    }
}
