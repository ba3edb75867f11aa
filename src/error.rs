//! HTTP-facing error type.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorInfo,
}

#[derive(Serialize)]
struct ErrorInfo {
    code: &'static str,
    message: String,
    details: Value,
}

/// Errors returned by HTTP handlers and middleware.
///
/// Rendered as `{"error": {"code", "message", "details"}}` with the matching
/// status code.
#[derive(Debug)]
pub enum AppError {
    /// Rate limit exceeded; adds a `Retry-After` header.
    TooManyRequests { retry_after_seconds: u64, details: Value },
}

impl AppError {
    pub fn too_many_requests(retry_after_seconds: u64) -> Self {
        Self::TooManyRequests {
            retry_after_seconds,
            details: json!({ "retry_after_seconds": retry_after_seconds }),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, details, retry_after) = match self {
            AppError::TooManyRequests {
                retry_after_seconds,
                details,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many requests".to_string(),
                details,
                Some(retry_after_seconds),
            ),
        };

        let body = ErrorBody {
            error: ErrorInfo {
                code,
                message,
                details,
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}
