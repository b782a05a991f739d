use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;

use biosync_core::provider_events::ProviderEvent;
use biosync_core::records::{IngestCounts, IngestSummary};

use crate::auth::{WebhookUser, verify_signed_request};
use crate::error::AppError;
use crate::extract::AppJson;
use crate::ingest::ProviderAction;
use crate::state::AppState;

pub fn health_export_router() -> Router<AppState> {
    Router::new().route("/v1/webhooks/health-export", post(receive_health_export))
}

pub fn vital_router() -> Router<AppState> {
    Router::new().route("/v1/webhooks/vital", post(receive_vital_event))
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEventResponse {
    pub success: bool,
    pub event_type: String,
    pub action: ProviderAction,
    #[serde(flatten)]
    pub counts: IngestCounts,
}

/// Ingest a batch health-export payload
///
/// Accepts the metric list at `data.metrics`, `metrics`, `data`, the root
/// array, or a single metric object. Every write is an upsert, so replaying
/// a payload is safe.
#[utoipa::path(
    post,
    path = "/v1/webhooks/health-export",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Payload ingested", body = IngestSummary),
        (status = 400, description = "No metric list found in payload", body = biosync_core::error::ApiError),
        (status = 401, description = "Missing, unknown or revoked webhook token", body = biosync_core::error::ApiError),
        (status = 429, description = "Rate limited", body = biosync_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "webhooks"
)]
pub async fn receive_health_export(
    State(state): State<AppState>,
    user: WebhookUser,
    AppJson(body): AppJson<Value>,
) -> Result<Json<IngestSummary>, AppError> {
    let counts = state.ingestor.ingest_payload(user.user_id, &body).await?;
    tracing::info!(
        user_id = %user.user_id,
        token_id = %user.token_id,
        biomarkers = counts.biomarkers_count,
        sleep_sessions = counts.sleep_sessions_count,
        workouts = counts.workout_sessions_count,
        "Health export ingested"
    );
    Ok(Json(IngestSummary::from(counts)))
}

/// Receive one signed aggregator event
///
/// The request must carry `webhook-id`, `webhook-timestamp` and
/// `webhook-signature` (or their `svix-` aliases).
#[utoipa::path(
    post,
    path = "/v1/webhooks/vital",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Event handled", body = ProviderEventResponse),
        (status = 400, description = "Body is not a provider event", body = biosync_core::error::ApiError),
        (status = 401, description = "Signature missing, stale or invalid", body = biosync_core::error::ApiError),
        (status = 429, description = "Rate limited", body = biosync_core::error::ApiError)
    ),
    tag = "webhooks"
)]
pub async fn receive_vital_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ProviderEventResponse>, AppError> {
    verify_signed_request(
        &headers,
        &body,
        state.config.vital_webhook_secret.as_deref(),
        state.config.signature_tolerance_secs,
        chrono::Utc::now(),
    )?;

    let event: ProviderEvent = serde_json::from_slice(&body).map_err(|err| AppError::Validation {
        message: format!("Invalid provider event: {err}"),
        field: Some("event_type".to_string()),
        received: None,
        docs_hint: Some(
            "Provider events are JSON objects with 'event_type' and 'data'.".to_string(),
        ),
    })?;

    let outcome = state.ingestor.ingest_provider_event(&event).await?;
    Ok(Json(ProviderEventResponse {
        success: true,
        event_type: event.event_type,
        action: outcome.action,
        counts: outcome.counts,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn provider_response_flattens_counts() {
        let response = ProviderEventResponse {
            success: true,
            event_type: "daily.data.glucose.created".to_string(),
            action: ProviderAction::Ingested,
            counts: IngestCounts {
                biomarkers_count: 1,
                sleep_sessions_count: 0,
                workout_sessions_count: 0,
            },
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "success": true,
                "eventType": "daily.data.glucose.created",
                "action": "ingested",
                "biomarkersCount": 1,
                "sleepSessionsCount": 0,
                "workoutSessionsCount": 0
            })
        );
    }
}
