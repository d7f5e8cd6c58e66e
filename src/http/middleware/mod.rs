//! Middleware applied by the service around every route.
//!
//! # Data Flow
//! ```text
//! request
//!     → scoped_logger (service dispatcher)
//!     → request id (set, then propagate)
//!     → recover_panics
//!     → track_requests (duration metrics)
//!     → normalize_method_not_allowed
//!     → access_log (plugin routes only)
//!     → handler
//! ```

pub mod access_log;
pub mod errors;
pub mod recover;
pub mod request_metrics;

pub use access_log::{access_log, scoped_logger, AccessLog};
pub use errors::normalize_method_not_allowed;
pub use recover::{recover_panics, AbortHandler};
pub use request_metrics::{track_requests, RequestMetrics, UNMATCHED_ROUTE};
