//! Thin HTTP adapter.
//!
//! Authentication, rate limiting and API versioning live in front of this
//! service; the adapter only decodes requests, stamps correlation ids and
//! maps the core's error taxonomy onto problem-details responses.

pub mod routes;
pub mod state;

pub use routes::router;
pub use state::AppState;

use crate::error::PredictError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;

/// Problem-details error body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemDetails {
    pub status: u16,
    pub title: String,
    pub detail: String,
    pub instance: String,
    pub correlation_id: String,
    pub timestamp: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    title: &'static str,
    detail: String,
    instance: String,
    correlation_id: String,
}

impl ApiError {
    pub fn from_predict(err: PredictError, instance: &str, correlation_id: &str) -> Self {
        let (status, title) = match &err {
            PredictError::Validation(_) => (StatusCode::BAD_REQUEST, "Validation failed"),
            PredictError::InvalidData(_) => (StatusCode::BAD_REQUEST, "Invalid input data"),
            PredictError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "No active model"),
            PredictError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Prediction failed"),
        };
        Self {
            status,
            title,
            detail: err.message(),
            instance: instance.to_string(),
            correlation_id: correlation_id.to_string(),
        }
    }

    pub fn bad_request(detail: impl Into<String>, instance: &str, correlation_id: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            title: "Validation failed",
            detail: detail.into(),
            instance: instance.to_string(),
            correlation_id: correlation_id.to_string(),
        }
    }

    pub fn not_found(detail: impl Into<String>, instance: &str, correlation_id: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            title: "Not found",
            detail: detail.into(),
            instance: instance.to_string(),
            correlation_id: correlation_id.to_string(),
        }
    }

    pub fn conflict(detail: impl Into<String>, instance: &str, correlation_id: &str) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            title: "Conflict",
            detail: detail.into(),
            instance: instance.to_string(),
            correlation_id: correlation_id.to_string(),
        }
    }

    pub fn internal(detail: impl Into<String>, instance: &str, correlation_id: &str) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            title: "Internal error",
            detail: detail.into(),
            instance: instance.to_string(),
            correlation_id: correlation_id.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ProblemDetails {
            status: self.status.as_u16(),
            title: self.title.to_string(),
            detail: self.detail,
            instance: self.instance,
            correlation_id: self.correlation_id,
            timestamp: Utc::now().to_rfc3339(),
        };
        (self.status, Json(body)).into_response()
    }
}
