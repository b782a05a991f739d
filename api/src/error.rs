use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use biosync_core::error::{self, ApiError};
use biosync_core::payload::FormatError;

use crate::ingest::IngestError;
use crate::repository::RepoError;

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// No metric list could be extracted from the payload (400)
    PayloadFormat(FormatError),
    /// Missing or unknown webhook token (401)
    Unauthorized {
        message: String,
        docs_hint: Option<String>,
    },
    /// Signed request failed verification (401)
    InvalidSignature { message: String },
    /// Database error (500)
    Database(sqlx::Error),
    /// Internal error (500)
    Internal(String),
}

fn body(code: &str, message: String, request_id: String) -> ApiError {
    ApiError {
        error: code.to_string(),
        message,
        field: None,
        received: None,
        details: None,
        request_id,
        docs_hint: None,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    field,
                    received,
                    docs_hint,
                    ..body(error::codes::VALIDATION_FAILED, message, request_id)
                },
            ),
            AppError::PayloadFormat(err) => {
                tracing::warn!(reason = err.reason(), details = %err.details(), "Unrecognized payload format");
                (
                    StatusCode::BAD_REQUEST,
                    ApiError {
                        details: Some(err.details()),
                        docs_hint: Some(
                            "Expected a metric list under data.metrics, metrics, data, or the root. \
                             Run `biosync inspect --file <payload>` to see how a payload resolves."
                                .to_string(),
                        ),
                        ..body(
                            error::codes::INVALID_PAYLOAD_FORMAT,
                            "No metric list could be extracted from the payload".to_string(),
                            request_id,
                        )
                    },
                )
            }
            AppError::Unauthorized { message, docs_hint } => (
                StatusCode::UNAUTHORIZED,
                ApiError {
                    docs_hint,
                    ..body(error::codes::UNAUTHORIZED, message, request_id)
                },
            ),
            AppError::InvalidSignature { message } => {
                tracing::warn!(%message, "Rejected signed webhook");
                (
                    StatusCode::UNAUTHORIZED,
                    body(error::codes::INVALID_SIGNATURE, message, request_id),
                )
            }
            AppError::Database(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    body(
                        error::codes::INTERNAL_ERROR,
                        "An internal error occurred".to_string(),
                        request_id,
                    ),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    body(
                        error::codes::INTERNAL_ERROR,
                        "An internal error occurred".to_string(),
                        request_id,
                    ),
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err)
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Database(err) => AppError::Database(err),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Format(err) => AppError::PayloadFormat(err),
            IngestError::Repo(err) => err.into(),
            IngestError::Task(err) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<FormatError> for AppError {
    fn from(err: FormatError) -> Self {
        AppError::PayloadFormat(err)
    }
}
