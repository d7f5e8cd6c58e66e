//! Bootstrap layer for HTTP microservices.
//!
//! A [`Service`] owns the plumbing every service needs: status routes under
//! `/-/`, an isolated Prometheus registry, request duration metrics, panic
//! recovery, JSON error bodies, request ids, per-service logging and a
//! bounded graceful shutdown. Business routes are added as [`Plugin`]s.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::ServiceConfig;
pub use http::{
    json, json_response, AbortHandler, DefaultStatus, ErrorMessage, Plugin, Service, ServiceError,
    ServiceOptions, StatusProvider, StatusResponse,
};
pub use lifecycle::{ServiceState, StopHandle};
pub use observability::{LogFormat, MetricsFactory, MetricsRegistrar, MetricsRegistry};
