use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header::AUTHORIZATION, HeaderMap},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::health::{HealthState, LastOutcome};
use crate::error::AppError;
use crate::scheduler::{Report, Scheduler};

#[derive(Clone)]
pub struct ApiState {
    pub scheduler: Arc<Scheduler>,
    pub health: Arc<HealthState>,
    /// `None` when CRON_SECRET is unset: every trigger is refused.
    pub cron_secret: Option<Arc<str>>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/api/cron/scheduler",
            post(trigger_scheduler).fallback(method_not_allowed),
        )
        .route("/health", get(get_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct TriggerQuery {
    pub secret: Option<String>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct TriggerResponse {
    pub success: bool,
    pub report: Report,
}

#[derive(Serialize)]
pub struct TickLatency {
    pub samples: u64,
    pub p50: Option<u64>,
    pub p95: Option<u64>,
    pub p99: Option<u64>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub ticks: u64,
    pub last_actions_executed: u64,
    pub tick_ms: TickLatency,
    pub actions: serde_json::Map<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Authenticate, probe the datastore, then run one tick at the current instant.
/// Nothing touches storage before the secret has been checked.
async fn trigger_scheduler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<TriggerQuery>,
) -> Result<Json<TriggerResponse>, AppError> {
    let Some(expected) = state.cron_secret.as_deref() else {
        warn!("Trigger refused: CRON_SECRET is not configured");
        return Err(AppError::Misconfigured("CRON_SECRET is not set".to_string()));
    };

    let provided = provided_secret(&headers, query.secret.as_deref());
    if !provided.is_some_and(|p| constant_time_eq(p.as_bytes(), expected.as_bytes())) {
        warn!("Trigger refused: missing or wrong secret");
        return Err(AppError::Forbidden);
    }

    state
        .scheduler
        .store()
        .ping()
        .await
        .map_err(|e| AppError::Unavailable(e.to_string()))?;

    let report = state.scheduler.execute(Utc::now()).await;
    info!(
        actions = report.actions_executed,
        "Triggered tick ran {} actions",
        report.actions_executed
    );
    Ok(Json(TriggerResponse { success: true, report }))
}

async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let (p50, p95, p99) = state.health.tick_latency.percentiles();
    let actions = state
        .health
        .outcomes()
        .into_iter()
        .map(|(key, outcome): (String, LastOutcome)| {
            (key, serde_json::to_value(outcome).unwrap_or(serde_json::Value::Null))
        })
        .collect();

    Json(HealthResponse {
        status: "ok",
        last_tick_at: state.health.last_tick_at(),
        ticks: state.health.ticks(),
        last_actions_executed: state.health.last_actions_executed(),
        tick_ms: TickLatency { samples: state.health.tick_latency.len(), p50, p95, p99 },
        actions,
    })
}

/// `Authorization: Bearer <s>`, then `x-cron-secret`, then `?secret=`.
fn provided_secret<'a>(headers: &'a HeaderMap, query: Option<&'a str>) -> Option<&'a str> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    let header = headers.get("x-cron-secret").and_then(|v| v.to_str().ok()).map(str::trim);
    bearer
        .or(header)
        .or(query)
        .filter(|s| !s.is_empty())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
