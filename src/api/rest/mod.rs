//! REST API module for HTTP endpoints
//!
//! - `GET/POST /api/markers`, `GET/PUT/DELETE /api/markers/:id`, `GET /api/markers/stats`
//!   (create and update accept JSON or `multipart/form-data` with an `attachment` file)
//! - `GET/POST /api/samples`, `GET /api/samples/range`
//! - `GET /api/users/recent`, `GET /api/users/:id`, `GET /api/presence`

pub mod markers;
pub mod samples;
pub mod users;

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, error};

use crate::error::{AttachmentError, StoreError};

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    /// Total count (for truncated lists)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
            total: None,
        }
    }

    pub fn with_total(data: T, total: usize) -> Self {
        Self {
            success: true,
            data,
            total: Some(total),
        }
    }
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub success: bool,
    pub error: String,
    pub code: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            success: false,
            error: message.into(),
            code: code.to_string(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    /// Envelope for an extractor rejection. Oversized bodies keep their 413,
    /// everything else is a bad request.
    fn rejected(status: StatusCode, text: String) -> Self {
        debug!(status = %status, reason = %text, "request rejected");
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::payload_too_large("Payload too large")
        } else {
            ApiError::bad_request(text)
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::rejected(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::rejected(rejection.status(), rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::rejected(rejection.status(), rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::rejected(e.status(), e.body_text())
    }
}

impl From<AttachmentError> for ApiError {
    fn from(e: AttachmentError) -> Self {
        match e {
            AttachmentError::UnsupportedType(_) => ApiError::bad_request(e.to_string()),
            AttachmentError::Io(_) => {
                error!(error = %e, "attachment storage failed");
                ApiError::internal(e.to_string())
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        error!(error = %e, "store operation failed");
        ApiError::internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Result type for REST handlers
pub type ApiResult<T> = Result<T, ApiError>;
