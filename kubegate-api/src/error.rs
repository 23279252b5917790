//! Standardized error handling for API responses
//!
//! Provides consistent JSON error responses across all API endpoints

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Standard API error response format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status code
    pub status: u16,

    /// Error code for programmatic handling
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// Optional detailed error information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// Every violated constraint, for validation failures
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,

    /// Timestamp when error occurred
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(status: u16, error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            message: message.into(),
            details: None,
            violations: Vec::new(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_violations(mut self, violations: Vec<String>) -> Self {
        self.violations = violations;
        self
    }
}

/// API error types with standardized responses
#[derive(Debug)]
pub enum ApiError {
    /// 500 Internal Server Error
    Internal(String),

    /// 404 Not Found
    NotFound(String),

    /// 401 Unauthorized
    AuthenticationFailed,

    /// 403 Forbidden
    Forbidden(String),

    /// 400 Bad Request
    BadRequest(String),

    /// 409 Conflict
    Conflict(String),

    /// 412 Precondition Failed
    PreconditionFailed(String),

    /// 400 Bad Request carrying the full list of violations
    ValidationError(Vec<String>),

    /// 502 Bad Gateway
    BadGateway(String),

    /// 504 Gateway Timeout
    GatewayTimeout(String),
}

impl ApiError {
    /// Convert error to ErrorResponse
    pub fn to_error_response(&self) -> ErrorResponse {
        match self {
            ApiError::Internal(msg) => {
                error!("Internal API error: {}", msg);
                ErrorResponse::new(
                    500,
                    "INTERNAL_ERROR",
                    "An internal server error occurred",
                )
                .with_details(msg)
            }
            ApiError::NotFound(msg) => {
                ErrorResponse::new(404, "NOT_FOUND", msg)
            }
            ApiError::AuthenticationFailed => {
                ErrorResponse::new(
                    401,
                    "AUTHENTICATION_FAILED",
                    "Authentication credentials are invalid or missing",
                )
            }
            ApiError::Forbidden(msg) => {
                ErrorResponse::new(403, "FORBIDDEN", msg)
            }
            ApiError::BadRequest(msg) => {
                ErrorResponse::new(400, "BAD_REQUEST", msg)
            }
            ApiError::Conflict(msg) => {
                ErrorResponse::new(409, "CONFLICT", msg)
            }
            ApiError::PreconditionFailed(msg) => {
                ErrorResponse::new(412, "PRECONDITION_FAILED", msg)
            }
            ApiError::ValidationError(violations) => {
                let message = match violations.len() {
                    1 => violations[0].clone(),
                    n => format!("{} constraints violated", n),
                };
                ErrorResponse::new(400, "VALIDATION_ERROR", message)
                    .with_violations(violations.clone())
            }
            ApiError::BadGateway(msg) => {
                ErrorResponse::new(502, "UPSTREAM_ERROR", msg)
            }
            ApiError::GatewayTimeout(msg) => {
                ErrorResponse::new(504, "TIMEOUT", msg)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_response = self.to_error_response();
        let status_code = StatusCode::from_u16(error_response.status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        (status_code, Json(error_response)).into_response()
    }
}

/// Helper functions for creating common errors
impl ApiError {
    pub fn missing_param(name: &str) -> Self {
        ApiError::BadRequest(format!("Missing required query parameter '{}'", name))
    }

    pub fn namespace_denied(namespace: Option<&str>) -> Self {
        match namespace {
            Some(ns) => ApiError::Forbidden(format!("Access to namespace '{}' is not permitted", ns)),
            None => ApiError::Forbidden(
                "Cluster-wide access requires permission on all namespaces".to_string(),
            ),
        }
    }

    pub fn admin_required() -> Self {
        ApiError::Forbidden("This operation requires the admin role".to_string())
    }
}
