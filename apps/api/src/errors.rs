use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::extraction::models::ParseFailure;
use crate::extraction::pipeline::PipelineError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No resume could be extracted")]
    EmptyResult(Vec<ParseFailure>),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::AggregateEmptyResult { failures } => AppError::EmptyResult(failures),
            other => AppError::Internal(other.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, failures) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, Vec::new()),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg, Vec::new())
            }
            AppError::EmptyResult(failures) => {
                tracing::warn!("Extraction produced no rows ({} failures)", failures.len());
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "AGGREGATE_EMPTY_RESULT",
                    "No resume could be extracted; no output file was produced".to_string(),
                    failures,
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                    Vec::new(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
                "failures": failures,
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::models::FailureReason;

    #[test]
    fn test_aggregate_empty_maps_to_unprocessable() {
        let err: AppError = PipelineError::AggregateEmptyResult {
            failures: vec![ParseFailure::new(
                "a.pdf",
                FailureReason::MalformedPayload,
                "no JSON object found in response",
            )],
        }
        .into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_validation_maps_to_bad_request() {
        let response = AppError::Validation("no files".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
