//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML. Every field
//! has a default so an empty file (or no file) is a valid configuration.

use serde::{Deserialize, Serialize};

/// Root configuration for the service.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Durable log file and diagnostic log level.
    pub logging: LoggingConfig,

    /// Metrics, export and resource settings.
    pub observability: ObservabilityConfig,

    /// Failure injection settings.
    pub pipeline: PipelineConfig,

    /// Shutdown behaviour.
    pub shutdown: ShutdownConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Whole-request timeout in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Path of the append-only JSON-lines log file.
    pub file_path: String,

    /// Diagnostic log level (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file_path: "app.log".to_string(),
            level: "info".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `service.name` resource attribute.
    pub service_name: String,

    /// `service.version` resource attribute.
    pub service_version: String,

    /// `deployment.environment` resource attribute.
    pub environment: String,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Maximum spans per exported batch.
    pub export_batch_size: usize,

    /// Interval between scheduled exports in milliseconds.
    pub export_interval_ms: u64,

    /// OTLP/HTTP traces endpoint.
    pub otlp_endpoint: String,

    /// Per-request deadline for the OTLP exporter in milliseconds.
    pub export_timeout_ms: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "order-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
            export_batch_size: 512,
            export_interval_ms: 5000,
            otlp_endpoint: "http://localhost:4318/v1/traces".to_string(),
            export_timeout_ms: 10_000,
        }
    }
}

/// Failure injection configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Buckets (out of `total_buckets`) that take the failure path.
    pub failure_buckets: u64,

    /// Total buckets drawn from per request.
    pub total_buckets: u64,

    /// Seed for a reproducible random source. OS-seeded when absent.
    pub seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            failure_buckets: 1,
            total_buckets: 10,
            seed: None,
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Window for flushing telemetry after the server stops.
    pub grace_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_secs: 5 }
    }
}
