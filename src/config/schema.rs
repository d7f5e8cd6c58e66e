//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.
//! Every field has a default, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::observability::LogFormat;

/// Root configuration of a service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name, reported by the status routes.
    pub name: String,

    /// Service version, reported by the status routes.
    pub version: String,

    /// Listener port; the service binds `0.0.0.0:<http_port>`.
    pub http_port: u16,

    /// One of trace, debug, info, warn, error, off.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Budget for draining in-flight requests on shutdown.
    pub shutdown_timeout_secs: u64,

    pub metrics: MetricsConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            http_port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            shutdown_timeout_secs: 30,
            metrics: MetricsConfig::default(),
        }
    }
}

/// Metrics settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Register the process and runtime collectors.
    pub default_collectors: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            default_collectors: true,
        }
    }
}
