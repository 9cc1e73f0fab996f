//! API utility functions
//!
//! Stateless helpers for request processing, kept apart from the handlers
//! so they can be unit tested.

use axum::http::HeaderMap;

use crate::api::error::ApiError;

pub const ACCOUNT_HEADER: &str = "X-Account-Id";

/// Parses and validates Content-Type header for application/json
///
/// Accepts:
/// - `application/json`
/// - `application/json; charset=utf-8`
///
/// Rejects `application/jsonp`, `text/json`, and malformed media types.
pub fn parse_content_type(content_type: &str) -> Result<mime::Mime, ApiError> {
    let media_type: mime::Mime = content_type.parse().map_err(|_| {
        ApiError::InvalidPayload(format!("invalid Content-Type: {}", content_type))
    })?;

    if media_type.type_() != mime::APPLICATION || media_type.subtype() != mime::JSON {
        return Err(ApiError::InvalidPayload(format!(
            "Content-Type must be application/json, got: {}/{}",
            media_type.type_(),
            media_type.subtype()
        )));
    }

    Ok(media_type)
}

/// Requires a JSON Content-Type header on a request with a body
pub fn require_json(headers: &HeaderMap) -> Result<(), ApiError> {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;

    parse_content_type(content_type).map(|_| ())
}

pub fn validate_body_size(data: &[u8], max_size: usize) -> Result<(), ApiError> {
    if data.len() > max_size {
        return Err(ApiError::PayloadTooLarge(data.len()));
    }
    Ok(())
}

/// The caller's account id, already verified upstream
pub fn account_id_from_headers(headers: &HeaderMap) -> Result<u64, ApiError> {
    headers
        .get(ACCOUNT_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .ok_or(ApiError::MissingAccount)
}

/// `Content-Type` to serve a payload with, taken from download metadata
pub fn payload_content_type(metadata: &crate::task::Metadata) -> String {
    metadata
        .get("content-type")
        .and_then(|v| v.as_str())
        .and_then(|v| v.parse::<mime::Mime>().ok())
        .map(|m| m.to_string())
        .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string())
}
