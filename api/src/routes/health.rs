use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router, routing::get};

use crate::HealthResponse;
use crate::state::{AppState, IngestConfig};

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Health check: database reachability and whether signed provider events
/// can be accepted
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Database unreachable", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.db)
        .await
        .is_ok();

    let (status, report) = health_report(db_ok, &state.config);
    (status, Json(report))
}

fn health_report(db_ok: bool, config: &IngestConfig) -> (StatusCode, HealthResponse) {
    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let report = HealthResponse {
        status: if db_ok { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if db_ok { "reachable" } else { "unreachable" }.to_string(),
        signed_events: config.vital_webhook_secret.is_some(),
        default_tz: config.default_tz.name().to_string(),
    };
    (status, report)
}
