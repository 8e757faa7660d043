//! HTTP-facing errors with a JSON body of `{ "error": { code, message } }`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::blob::BlobError;
use crate::prescription::AnalysisError;
use crate::store::StoreError;
use crate::validate::{FieldError, ValidationErrors};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldError>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation failed")]
    Validation(ValidationErrors),
    #[error("Upstream service returned {status}")]
    Upstream { status: u16, body: String },
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, fields) = match self {
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail, None),
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "NOT_FOUND", detail, None),
            ApiError::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION",
                errors.messages().join(", "),
                Some(errors.0),
            ),
            ApiError::Upstream { status, body } => {
                tracing::warn!(status, "⚠️ Upstream failure passed to client");
                (StatusCode::BAD_GATEWAY, "UPSTREAM", body, None)
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail, "❌ API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code,
                message,
                fields,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<BlobError> for ApiError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::NotFound(key) => ApiError::NotFound(format!("Blob {key} not found")),
            BlobError::InvalidKey(key) => ApiError::BadRequest(format!("Invalid blob key: {key}")),
            BlobError::Io(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::Status { status, body } => ApiError::Upstream { status, body },
            other => ApiError::Upstream {
                status: 0,
                body: other.to_string(),
            },
        }
    }
}
