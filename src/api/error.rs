use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;
use tracing::error;

use super::models::ErrorResponse;
use crate::error::TaskError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("payload invalid: {0}")]
    InvalidPayload(String),
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("X-Account-Id header is missing or malformed")]
    MissingAccount,
    #[error(transparent)]
    Task(#[from] TaskError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::MissingAccount => StatusCode::UNAUTHORIZED,
            ApiError::Task(err) => match err {
                TaskError::NotFound(_) => StatusCode::NOT_FOUND,
                TaskError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
                TaskError::InvalidState { .. } => StatusCode::CONFLICT,
                TaskError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
                TaskError::LockTimeout(_) | TaskError::Cancelled => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::MissingAccount => "MISSING_ACCOUNT",
            ApiError::Task(err) => match err {
                TaskError::NotFound(_) => "NOT_FOUND",
                TaskError::PermissionDenied { .. } => "PERMISSION_DENIED",
                TaskError::InvalidState { .. } => "INVALID_STATE",
                TaskError::InvalidArgument(_) => "INVALID_ARGUMENT",
                TaskError::LockTimeout(_) => "LOCK_TIMEOUT",
                TaskError::Cancelled => "CANCELLED",
                _ => "INTERNAL_ERROR",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }

        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::InvalidPayload(value.to_string())
    }
}
