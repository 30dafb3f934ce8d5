// HTTP error responses
//
// Every failure leaves the gateway as `{error, error_code, details, timestamp}`.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use toolhost_core::RunnerError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: Option<String>,
    pub details: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not Found")]
    NotFound(String),

    #[error("Internal Server Error")]
    Internal,

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "VALIDATION_ERROR",
            ApiError::Unauthorized => "INVALID_API_KEY",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Internal => "INTERNAL_ERROR",
            ApiError::Runner(e) => e.code(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Runner(e) => match e {
                RunnerError::SessionNotFound(_) => StatusCode::NOT_FOUND,
                RunnerError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                RunnerError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            ApiError::InvalidRequest(message) => Some(json!({ "message": message })),
            ApiError::Unauthorized => Some(json!({ "message": "Valid API key required" })),
            ApiError::NotFound(path) => Some(json!({ "path": path })),
            ApiError::Internal => None,
            ApiError::Runner(RunnerError::RateLimited { retry_after_secs }) => {
                Some(json!({ "retry_after": retry_after_secs }))
            }
            ApiError::Runner(_) => None,
        }
    }

    pub fn body(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.to_string(),
            error_code: Some(self.code().to_string()),
            details: self.details(),
            timestamp: Utc::now(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = match self {
            ApiError::Runner(RunnerError::RateLimited { retry_after_secs }) => {
                Some(retry_after_secs)
            }
            _ => None,
        };

        let mut response = (status, Json(self.body())).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::InvalidRequest(rejection.body_text())
    }
}
