//! JSON responses and the fixed error surface.
//!
//! # Responsibilities
//! - Encode handler payloads as `application/json`
//! - Provide the 404 / 405 / 500 bodies shared by every service
//!
//! # Design Decisions
//! - The content type is always `application/json`, including on encoding
//!   failures, which fall back to a fixed payload and a 500

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

pub const ROUTE_NOT_FOUND: &str = "Route not found";
pub const METHOD_NOT_ALLOWED: &str = "Method not allowed";
pub const GENERIC_SERVER_ERROR: &str = "Generic server error";

/// Written verbatim when a payload cannot be encoded.
pub const ENCODING_FAILURE_BODY: &str = r#"{"message":"error encoding response"}"#;

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

impl ErrorMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }
}

fn with_json_content_type(status: StatusCode, body: Vec<u8>) -> Response {
    (
        status,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        )],
        body,
    )
        .into_response()
}

/// Encode `body` as JSON with the given status.
pub fn json_response<T: Serialize + ?Sized>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => with_json_content_type(status, bytes),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode response body");
            with_json_content_type(
                StatusCode::INTERNAL_SERVER_ERROR,
                ENCODING_FAILURE_BODY.as_bytes().to_vec(),
            )
        }
    }
}

/// Encode `body` as JSON with `200 OK`.
pub fn json<T: Serialize + ?Sized>(body: &T) -> Response {
    json_response(StatusCode::OK, body)
}

pub fn not_found() -> Response {
    json_response(StatusCode::NOT_FOUND, &ErrorMessage::new(ROUTE_NOT_FOUND))
}

pub fn method_not_allowed() -> Response {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &ErrorMessage::new(METHOD_NOT_ALLOWED),
    )
}

pub fn internal_server_error() -> Response {
    json_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        &ErrorMessage::new(GENERIC_SERVER_ERROR),
    )
}

/// Router fallback for unmatched paths.
pub async fn route_not_found() -> Response {
    not_found()
}
