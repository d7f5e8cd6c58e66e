//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Service::new
//!     → logging.rs (per-service tracing dispatch)
//!     → metrics.rs (isolated Prometheus registry + factory)
//!     → collectors.rs (service/process/runtime gauges, refreshed on scrape)
//!
//! Consumers:
//!     → Request futures run under the service dispatch
//!     → GET /-/metrics renders the isolated registry
//!     → The serving loop runs registry upkeep every UPKEEP_INTERVAL
//! ```
//!
//! # Design Decisions
//! - Nothing here installs process-wide state: no global subscriber, no
//!   global recorder. Two services in one process never collide.
//! - Metric names are unique per registry; registering twice is an error.

pub mod collectors;
pub mod logging;
pub mod metrics;

pub use logging::{LogFormat, LoggingError};
pub use metrics::{
    initialize_metrics, CounterVec, HistogramVec, MetricsError, MetricsFactory, MetricsRegistrar,
    MetricsRegistry, UPKEEP_INTERVAL,
};
