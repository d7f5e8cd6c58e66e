//! Request logging.
//!
//! Two layers live here. [`scoped_logger`] runs the whole request under the
//! service's own dispatcher, so a service never writes into another
//! service's logger. [`access_log`] opens a `request` span around plugin
//! traffic and logs one line per completed request.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, Instrument};

use crate::http::X_REQUEST_ID;

/// Access log settings: path prefixes that are never logged.
#[derive(Debug, Clone, Default)]
pub struct AccessLog {
    excluded: Arc<[String]>,
}

impl AccessLog {
    pub fn excluding<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    fn is_excluded(&self, path: &str) -> bool {
        self.excluded.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

/// Log method, path, status and latency of each request.
pub async fn access_log(
    State(log): State<AccessLog>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if log.is_excluded(&path) {
        return next.run(request).await;
    }

    let method = request.method().clone();
    let request_id = request
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let span = tracing::info_span!(
        "request",
        method = %method,
        path = %path,
        request_id = %request_id,
    );

    async move {
        let start = Instant::now();
        let response = next.run(request).await;
        tracing::info!(
            status = response.status().as_u16(),
            latency = ?start.elapsed(),
            "Request completed"
        );
        response
    }
    .instrument(span)
    .await
}

/// Run the rest of the stack under `dispatch`.
pub async fn scoped_logger(
    State(dispatch): State<Dispatch>,
    request: Request<Body>,
    next: Next,
) -> Response {
    next.run(request).with_subscriber(dispatch).await
}
