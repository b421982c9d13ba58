//! REST endpoints.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::{AppState, error_response};
use crate::error::WarmupError;
use crate::warmup::{LogKind, WarmupPolicy};

// ── Health ──────────────────────────────────────────────────────────────

pub(crate) async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "mail-warmup"
    }))
}

// ── Warmup schedules ────────────────────────────────────────────────────

fn parse_id(id: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(id).map_err(|_| error_response(StatusCode::BAD_REQUEST, "Invalid schedule ID"))
}

pub(crate) async fn list_schedules(State(state): State<AppState>) -> Response {
    match state.scheduler.list().await {
        Ok(schedules) => Json(schedules).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Body is optional; without one the configured ramp applies.
pub(crate) async fn start_warmup(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    policy: Option<Json<WarmupPolicy>>,
) -> Response {
    let policy = policy.map(|Json(p)| p).unwrap_or_default();
    match state.scheduler.start_with(&account_id, &policy).await {
        Ok(schedule) => (StatusCode::OK, Json(schedule)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub(crate) async fn get_schedule(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.scheduler.snapshot(id).await {
        Ok(schedule) => Json(schedule).into_response(),
        Err(e) => e.into_response(),
    }
}

pub(crate) async fn pause_schedule(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.scheduler.pause(id).await {
        Ok(schedule) => Json(schedule).into_response(),
        Err(e) => e.into_response(),
    }
}

pub(crate) async fn resume_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.scheduler.resume(id).await {
        Ok(schedule) => Json(schedule).into_response(),
        Err(e) => e.into_response(),
    }
}

pub(crate) async fn remove_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.scheduler.remove(id).await {
        Ok(true) => Json(serde_json::json!({"ok": true})).into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, "Schedule not found"),
        Err(e) => e.into_response(),
    }
}

// ── Accounts ────────────────────────────────────────────────────────────

pub(crate) async fn send_limit(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Response {
    match state.scheduler.send_limit(&account_id).await {
        Ok(limit) => Json(limit).into_response(),
        Err(e) => e.into_response(),
    }
}

const DEFAULT_HISTORY_DAYS: usize = 30;
const MAX_HISTORY_DAYS: usize = 366;

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryParams {
    limit: Option<usize>,
}

/// Past ledger days for an account, newest first.
pub(crate) async fn ledger_history(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Response {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_DAYS)
        .min(MAX_HISTORY_DAYS);
    match state.scheduler.ledger().history(&account_id, limit).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => WarmupError::from(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RecordSendsBody {
    success_count: u32,
}

pub(crate) async fn record_sends(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(body): Json<RecordSendsBody>,
) -> Response {
    match state.scheduler.record_sends(&account_id, body.success_count).await {
        Ok(attributed) => {
            info!(account_id = %account_id, reported = body.success_count, attributed, "Sends recorded");
            Json(serde_json::json!({"ok": true, "attributed": attributed})).into_response()
        }
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SignalBody {
    kind: LogKind,
    recipient: String,
}

pub(crate) async fn record_signal(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(body): Json<SignalBody>,
) -> Response {
    if matches!(body.kind, LogKind::Sent | LogKind::HealthCheck) {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("Signal kind {} is recorded internally", body.kind.as_str()),
        );
    }
    match state
        .scheduler
        .record_signal(&account_id, body.kind, &body.recipient)
        .await
    {
        Ok(()) => Json(serde_json::json!({"ok": true})).into_response(),
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::api::api_routes;
    use crate::config::{LedgerConfig, WarmupConfig};
    use crate::dispatch::DispatchPipeline;
    use crate::dispatch::transport::testing::ScriptedTransport;
    use crate::health::{HealthScorer, HealthWeights};
    use crate::ledger::QuotaLedger;
    use crate::store::{Database, LibSqlBackend};
    use crate::warmup::WarmupScheduler;

    async fn app() -> axum::Router {
        let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let ledger = Arc::new(QuotaLedger::new(Arc::clone(&store), LedgerConfig::default()));
        let scorer = HealthScorer::new(Arc::clone(&store), HealthWeights::default(), 7);
        let scheduler = Arc::new(WarmupScheduler::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            scorer,
            WarmupConfig::default(),
        ));
        let pipeline = Arc::new(DispatchPipeline::new(
            store,
            ledger,
            Arc::new(ScriptedTransport::default()),
        ));
        api_routes(scheduler, pipeline)
    }

    async fn call(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (u16, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(v) => builder
                .header("content-type", "application/json")
                .body(Body::from(v.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status().as_u16();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn start_pause_resume_flow() {
        let app = app().await;
        let (status, schedule) = call(&app, "POST", "/api/warmup/acct/start", None).await;
        assert_eq!(status, 200);
        assert_eq!(schedule["status"], "warming");
        let id = schedule["id"].as_str().unwrap().to_string();

        let (status, again) = call(&app, "POST", "/api/warmup/acct/start", None).await;
        assert_eq!(status, 409);
        assert!(again["error"].is_string());

        let (status, paused) = call(&app, "POST", &format!("/api/warmup/schedules/{id}/pause"), None).await;
        assert_eq!(status, 200);
        assert_eq!(paused["status"], "paused");

        let (status, _) = call(&app, "POST", &format!("/api/warmup/schedules/{id}/pause"), None).await;
        assert_eq!(status, 409);

        let (status, resumed) = call(&app, "POST", &format!("/api/warmup/schedules/{id}/resume"), None).await;
        assert_eq!(status, 200);
        assert_eq!(resumed["status"], "warming");
    }

    #[tokio::test]
    async fn start_accepts_account_policy() {
        let app = app().await;
        let policy = serde_json::json!({
            "baseVolume": 12,
            "maxDaily": 60,
            "totalDays": 10,
            "utcOffsetMinutes": 330
        });
        let (status, schedule) = call(&app, "POST", "/api/warmup/acct/start", Some(policy)).await;
        assert_eq!(status, 200);
        assert_eq!(schedule["target_daily_volume"], 12);
        assert_eq!(schedule["utc_offset_minutes"], 330);

        let (_, limit) = call(&app, "GET", "/api/accounts/acct/send-limit", None).await;
        assert_eq!(limit["dailyLimit"], 12);
        assert_eq!(limit["rampDays"], 10);

        let bad = serde_json::json!({"baseVolume": 90, "maxDaily": 60});
        let (status, body) = call(&app, "POST", "/api/warmup/other/start", Some(bad)).await;
        assert_eq!(status, 400);
        assert!(body["error"].as_str().unwrap().contains("baseVolume"));
    }

    #[tokio::test]
    async fn bad_and_unknown_ids() {
        let app = app().await;
        let (status, _) = call(&app, "GET", "/api/warmup/schedules/not-a-uuid", None).await;
        assert_eq!(status, 400);

        let unknown = uuid::Uuid::new_v4();
        let (status, _) = call(&app, "GET", &format!("/api/warmup/schedules/{unknown}"), None).await;
        assert_eq!(status, 404);
        let (status, _) = call(&app, "DELETE", &format!("/api/warmup/schedules/{unknown}"), None).await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn send_limit_and_record_sends() {
        let app = app().await;
        call(&app, "POST", "/api/warmup/acct/start", None).await;

        let (status, body) = call(
            &app,
            "POST",
            "/api/accounts/acct/sends",
            Some(serde_json::json!({"successCount": 7})),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["attributed"], 5);

        let (_, limit) = call(&app, "GET", "/api/accounts/acct/send-limit", None).await;
        assert_eq!(limit["isRamping"], true);
        assert_eq!(limit["dailyLimit"], 5);
        assert_eq!(limit["sentToday"], 5);
        assert_eq!(limit["remaining"], 0);
        assert_eq!(limit["rampDays"], 14);
    }

    #[tokio::test]
    async fn ledger_history_lists_days() {
        let app = app().await;
        call(&app, "POST", "/api/warmup/acct/start", None).await;
        call(
            &app,
            "POST",
            "/api/accounts/acct/sends",
            Some(serde_json::json!({"successCount": 3})),
        )
        .await;

        let (status, history) = call(&app, "GET", "/api/accounts/acct/ledger?limit=7", None).await;
        assert_eq!(status, 200);
        let days = history.as_array().unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0]["daily_limit"], 5);
        assert_eq!(days[0]["sent_count"], 3);

        let (status, empty) = call(&app, "GET", "/api/accounts/nobody/ledger", None).await;
        assert_eq!(status, 200);
        assert_eq!(empty, serde_json::json!([]));
    }

    #[tokio::test]
    async fn signals_reject_internal_kinds() {
        let app = app().await;
        call(&app, "POST", "/api/warmup/acct/start", None).await;

        let (status, _) = call(
            &app,
            "POST",
            "/api/accounts/acct/signals",
            Some(serde_json::json!({"kind": "sent", "recipient": "p@x.io"})),
        )
        .await;
        assert_eq!(status, 400);

        let (status, _) = call(
            &app,
            "POST",
            "/api/accounts/acct/signals",
            Some(serde_json::json!({"kind": "reply_received", "recipient": "p@x.io"})),
        )
        .await;
        assert_eq!(status, 200);
    }
}
