//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (port and shutdown budget non-zero)
//! - Check the log level is one the logger accepts
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>

use crate::config::schema::ServiceConfig;
use crate::observability::logging::parse_level;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("service name must not be empty")]
    EmptyName,
    #[error("service version must not be empty")]
    EmptyVersion,
    #[error("http_port must not be 0")]
    ZeroPort,
    #[error("shutdown_timeout_secs must be greater than 0")]
    ZeroShutdownTimeout,
    #[error("unrecognized log level `{0}`")]
    LogLevel(String),
}

pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.name.trim().is_empty() {
        errors.push(ValidationError::EmptyName);
    }
    if config.version.trim().is_empty() {
        errors.push(ValidationError::EmptyVersion);
    }
    if config.http_port == 0 {
        errors.push(ValidationError::ZeroPort);
    }
    if config.shutdown_timeout_secs == 0 {
        errors.push(ValidationError::ZeroShutdownTimeout);
    }
    if parse_level(&config.log_level).is_err() {
        errors.push(ValidationError::LogLevel(config.log_level.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
