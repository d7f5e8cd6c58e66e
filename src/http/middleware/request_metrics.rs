//! Request duration instrumentation.
//!
//! Every request except CONNECT, HEAD and OPTIONS is timed end to end and
//! recorded into a histogram and a summary, both labeled by status, method
//! and matched route pattern. The pattern (`/greet/{who}`), never the literal
//! path, keeps label cardinality bounded.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{Method, Request},
    middleware::Next,
    response::Response,
};

use crate::observability::metrics::{
    HistogramVec, MetricsError, MetricsFactory, REQUEST_DURATION_HISTOGRAM,
    REQUEST_DURATION_SUMMARY,
};

pub const STATUS_LABEL: &str = "status";
pub const METHOD_LABEL: &str = "method";
pub const ROUTE_LABEL: &str = "route";

/// Route label of requests that matched no route.
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// Duration metrics owned by one service.
#[derive(Clone)]
pub struct RequestMetrics {
    duration: HistogramVec,
    summary: HistogramVec,
}

impl RequestMetrics {
    /// Register the duration histogram and summary in the factory's registry.
    ///
    /// Fails with [`MetricsError::AlreadyRegistered`] when called twice
    /// against the same registry.
    pub fn register(factory: &MetricsFactory) -> Result<Self, MetricsError> {
        let labels = [STATUS_LABEL, METHOD_LABEL, ROUTE_LABEL];
        let duration = factory.try_histogram_vec(
            REQUEST_DURATION_HISTOGRAM,
            "request duration in seconds",
            &labels,
        )?;
        let summary = factory.try_histogram_vec(
            REQUEST_DURATION_SUMMARY,
            "request duration in seconds summary",
            &labels,
        )?;
        Ok(Self { duration, summary })
    }

    pub fn observe(&self, status: &str, method: &str, route: &str, seconds: f64) {
        let labels = [status, method, route];
        self.duration.with_label_values(&labels).record(seconds);
        self.summary.with_label_values(&labels).record(seconds);
    }
}

fn is_instrumented(method: &Method) -> bool {
    !(*method == Method::CONNECT || *method == Method::HEAD || *method == Method::OPTIONS)
}

/// Middleware recording one sample per instrumented request.
pub async fn track_requests(
    State(metrics): State<Arc<RequestMetrics>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !is_instrumented(request.method()) {
        return next.run(request).await;
    }

    let method = request.method().clone();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string());

    let start = Instant::now();
    let response = next.run(request).await;
    let elapsed = start.elapsed().as_secs_f64();

    metrics.observe(response.status().as_str(), method.as_str(), &route, elapsed);
    response
}
