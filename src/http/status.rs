//! Operational status endpoints.
//!
//! # Responsibilities
//! - Define the status capability (health, readiness, check-up)
//! - Provide the default "always OK" implementation
//! - Serve the isolated metrics registry
//!
//! # Design Decisions
//! - Providers return the whole GET route, so a custom provider can run
//!   real dependency checks; the service only wires what it gets back
//! - Empty name/version fields are omitted from the payload

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, MethodRouter},
};
use serde::{Deserialize, Serialize};

use crate::observability::MetricsRegistry;

/// Content type of the Prometheus text exposition format.
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Pluggable liveness, readiness and dependency check-up routes.
pub trait StatusProvider: Send + Sync {
    /// Route answering `GET /-/healthz`.
    fn health(&self, name: &str, version: &str) -> MethodRouter;
    /// Route answering `GET /-/ready`.
    fn ready(&self, name: &str, version: &str) -> MethodRouter;
    /// Route answering `GET /-/check-up`, which may verify dependent services.
    fn check_up(&self, name: &str, version: &str) -> MethodRouter;
}

/// Payload of the status routes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
}

impl StatusResponse {
    pub fn ok(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            status: "OK".to_string(),
        }
    }
}

/// Encode a status payload; answers 503 with status `KO` if encoding fails.
pub fn status_response(status: &StatusResponse) -> Response {
    let json = HeaderValue::from_static("application/json");
    match serde_json::to_vec(status) {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, json)], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode status response");
            let fallback = serde_json::json!({
                "name": status.name,
                "version": status.version,
                "status": "KO",
            });
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::CONTENT_TYPE, json)],
                fallback.to_string(),
            )
                .into_response()
        }
    }
}

/// Status provider answering `OK` to every probe.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStatus;

impl DefaultStatus {
    fn always_ok(name: &str, version: &str) -> MethodRouter {
        let status = StatusResponse::ok(name, version);
        get(move || {
            let status = status.clone();
            async move { status_response(&status) }
        })
    }
}

impl StatusProvider for DefaultStatus {
    fn health(&self, name: &str, version: &str) -> MethodRouter {
        Self::always_ok(name, version)
    }

    fn ready(&self, name: &str, version: &str) -> MethodRouter {
        Self::always_ok(name, version)
    }

    fn check_up(&self, name: &str, version: &str) -> MethodRouter {
        Self::always_ok(name, version)
    }
}

/// `GET /-/metrics`
pub async fn metrics(State(registry): State<MetricsRegistry>) -> Response {
    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static(METRICS_CONTENT_TYPE),
        )],
        registry.render(),
    )
        .into_response()
}
