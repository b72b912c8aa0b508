//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse, buckets consistent)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::ServiceConfig;

/// A single failed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Span queue capacity of the batch processor; a batch cannot exceed it.
const MAX_EXPORT_QUEUE: usize = 2048;

/// Check every semantic constraint, collecting all failures.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("{:?} is not a socket address", config.listener.bind_address),
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    if config.logging.file_path.trim().is_empty() {
        errors.push(ValidationError::new("logging.file_path", "must not be empty"));
    }

    let obs = &config.observability;
    if obs.service_name.trim().is_empty() {
        errors.push(ValidationError::new("observability.service_name", "must not be empty"));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("{:?} is not a socket address", obs.metrics_address),
        ));
    }
    if obs.export_batch_size == 0 || obs.export_batch_size > MAX_EXPORT_QUEUE {
        errors.push(ValidationError::new(
            "observability.export_batch_size",
            format!("must be between 1 and {MAX_EXPORT_QUEUE}"),
        ));
    }
    if obs.export_interval_ms == 0 {
        errors.push(ValidationError::new("observability.export_interval_ms", "must be greater than 0"));
    }
    if !(obs.otlp_endpoint.starts_with("http://") || obs.otlp_endpoint.starts_with("https://")) {
        errors.push(ValidationError::new(
            "observability.otlp_endpoint",
            format!("{:?} is not an http(s) URL", obs.otlp_endpoint),
        ));
    }
    if obs.export_timeout_ms == 0 {
        errors.push(ValidationError::new("observability.export_timeout_ms", "must be greater than 0"));
    }

    let pipeline = &config.pipeline;
    if pipeline.total_buckets == 0 {
        errors.push(ValidationError::new("pipeline.total_buckets", "must be greater than 0"));
    } else if pipeline.failure_buckets > pipeline.total_buckets {
        errors.push(ValidationError::new(
            "pipeline.failure_buckets",
            format!(
                "{} exceeds total_buckets {}",
                pipeline.failure_buckets, pipeline.total_buckets
            ),
        ));
    }

    if config.shutdown.grace_secs == 0 {
        errors.push(ValidationError::new("shutdown.grace_secs", "must be greater than 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
