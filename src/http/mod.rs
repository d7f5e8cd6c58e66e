//! HTTP surface of a service.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Service: compose router, serve, shut down)
//!     → middleware/ (logging, request id, panics, metrics, 405 body)
//!     → /-/... → status.rs (health, ready, check-up, metrics)
//!     → /...   → plugin.rs (user route groups)
//!     → response.rs (JSON bodies, 404 fallback)
//! ```

use axum::http::HeaderName;

pub mod middleware;
pub mod plugin;
pub mod response;
pub mod server;
pub mod status;

/// Header carrying the request correlation id.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

pub use middleware::AbortHandler;
pub use plugin::{Plugin, RouteBinding, RouteMethod, UnknownMethod};
pub use response::{json, json_response, ErrorMessage};
pub use server::{Service, ServiceError, ServiceOptions};
pub use status::{DefaultStatus, StatusProvider, StatusResponse};
