//! Error surface normalization.
//!
//! axum answers a known path with an unsupported verb with an empty 405.
//! This layer swaps in the JSON body every other error uses, keeping the
//! `Allow` header axum computed.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::http::response;

pub async fn normalize_method_not_allowed(request: Request<Body>, next: Next) -> Response {
    let response = next.run(request).await;
    if response.status() != StatusCode::METHOD_NOT_ALLOWED
        || response.headers().contains_key(header::CONTENT_TYPE)
    {
        return response;
    }

    let mut normalized = response::method_not_allowed();
    if let Some(allow) = response.headers().get(header::ALLOW) {
        normalized.headers_mut().insert(header::ALLOW, allow.clone());
    }
    normalized
}
