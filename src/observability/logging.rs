//! Structured logging.
//!
//! # Responsibilities
//! - Parse the configured log level
//! - Build the service's `tracing` dispatch (pretty or JSON output)
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - Each service owns a `Dispatch` instead of installing a global subscriber;
//!   request futures and lifecycle tasks run under it
//! - `fatal` and `panic` are accepted as aliases of `error`
//! - `RUST_LOG` can narrow or widen individual targets on top of the level

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::Dispatch;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

/// Error type for logger construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log level `{0}`")]
    InvalidLevel(String),
    #[error("invalid log format `{0}` (expected `pretty` or `json`)")]
    InvalidFormat(String),
}

/// Output format of the service logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines, for development.
    #[default]
    Pretty,
    /// One JSON object per line, for log aggregation.
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => f.write_str("pretty"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// Parse a log level name into a level filter.
pub fn parse_level(level: &str) -> Result<LevelFilter, LoggingError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok(LevelFilter::TRACE),
        "debug" => Ok(LevelFilter::DEBUG),
        "info" => Ok(LevelFilter::INFO),
        "warn" | "warning" => Ok(LevelFilter::WARN),
        "error" | "fatal" | "panic" => Ok(LevelFilter::ERROR),
        "off" | "disabled" => Ok(LevelFilter::OFF),
        _ => Err(LoggingError::InvalidLevel(level.to_string())),
    }
}

/// Build a dispatch writing to stdout at the given level.
///
/// `RUST_LOG` directives, when set, refine the configured level.
pub fn build_dispatch(level: LevelFilter, format: LogFormat) -> Dispatch {
    build_dispatch_to(level, format, std::io::stdout)
}

/// Build a dispatch writing to `writer`, for output captured elsewhere.
pub fn build_dispatch_to<W>(level: LevelFilter, format: LogFormat, writer: W) -> Dispatch
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => Dispatch::new(
            registry.with(tracing_subscriber::fmt::layer().with_writer(writer)),
        ),
        LogFormat::Json => Dispatch::new(
            registry.with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(writer),
            ),
        ),
    }
}

/// Parse `level` and build the dispatch in one step.
pub fn init(level: &str, format: LogFormat) -> Result<Dispatch, LoggingError> {
    let level = parse_level(level)?;
    Ok(build_dispatch(level, format))
}
