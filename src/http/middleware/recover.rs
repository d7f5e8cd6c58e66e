//! Panic containment.
//!
//! Turns a panicking handler into a `500 {"message":"Generic server error"}`
//! and keeps serving. The [`AbortHandler`] payload is the one exception: it
//! is re-raised so the connection is dropped without a response.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use futures_util::FutureExt;

use crate::http::response;
use crate::http::X_REQUEST_ID;

/// Sentinel panic payload that aborts the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbortHandler;

impl AbortHandler {
    /// Abort the current request. The connection is dropped silently.
    pub fn abort() -> ! {
        std::panic::panic_any(AbortHandler)
    }
}

/// Failure captured by the recovery boundary.
#[derive(Debug)]
enum Recovered {
    /// The handler panicked with an ordinary payload.
    Panicked { message: String },
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run `next`, catching panics other than [`AbortHandler`].
async fn run_guarded(request: Request<Body>, next: Next) -> Result<Response, Recovered> {
    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => Ok(response),
        Err(payload) if payload.is::<AbortHandler>() => std::panic::resume_unwind(payload),
        Err(payload) => Err(Recovered::Panicked {
            message: panic_message(payload.as_ref()),
        }),
    }
}

/// Middleware converting handler panics into a JSON 500.
pub async fn recover_panics(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    match run_guarded(request, next).await {
        Ok(response) => response,
        Err(Recovered::Panicked { message }) => {
            tracing::error!(
                request_id = %request_id,
                method = %method,
                path = %path,
                panic = %message,
                stack = %Backtrace::force_capture(),
                "Recovered from panic"
            );
            response::internal_server_error()
        }
    }
}
