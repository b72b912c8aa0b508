//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Install the Prometheus recorder and its scrape endpoint
//! - `OutcomeCounter`: terminal request outcomes labeled by status
//! - HTTP request counters and latency histograms
//!
//! # Metrics
//! - `orders_processed_total` (counter): terminal createOrder outcomes by `status`
//! - `http_requests_total` (counter): requests by method, route, status
//! - `http_request_duration_seconds` (histogram): latency distribution
//!
//! # Design Decisions
//! - Counter updates are lock-free atomic increments
//! - The outcome counter keeps a process-local tally alongside the recorder so
//!   totals can be checked in-process

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::observability::context::TraceContext;
use crate::observability::TelemetryError;

pub const ORDERS_PROCESSED_TOTAL: &str = "orders_processed_total";

/// Install the Prometheus recorder with an HTTP scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), TelemetryError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| TelemetryError::MetricsInstall(e.to_string()))?;

    describe_counter!("http_requests_total", Unit::Count, "Total HTTP requests handled");
    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request latency"
    );
    tracing::info!(address = %addr, "Prometheus metrics exporter started");
    Ok(())
}

/// Record a completed HTTP request.
pub fn record_request(method: &str, route: &str, status: u16, start: Instant) {
    let status = status.to_string();
    counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status.clone()
    )
    .increment(1);
    histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status
    )
    .record(start.elapsed().as_secs_f64());
}

/// Outcome category of a terminal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn label(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Monotonic counter of terminal outcomes. Never decremented or reset.
#[derive(Debug)]
pub struct OutcomeCounter {
    name: String,
    success: AtomicU64,
    failure: AtomicU64,
}

impl OutcomeCounter {
    /// Create and describe the counter. Call once at process start.
    pub fn new(name: &str, description: &str) -> Result<Self, TelemetryError> {
        if !is_valid_metric_name(name) {
            return Err(TelemetryError::InvalidInstrument(name.to_string()));
        }
        describe_counter!(name.to_string(), Unit::Count, description.to_string());
        Ok(Self {
            name: name.to_string(),
            success: AtomicU64::new(0),
            failure: AtomicU64::new(0),
        })
    }

    /// The `orders_processed_total` counter.
    pub fn orders_processed() -> Result<Self, TelemetryError> {
        Self::new(ORDERS_PROCESSED_TOTAL, "The total number of orders processed")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Increment the `outcome` series by `delta`.
    ///
    /// `ctx` only attributes the increment to a trace; the value is label-scoped.
    pub fn add(&self, ctx: &TraceContext, delta: u64, outcome: Outcome) {
        self.slot(outcome).fetch_add(delta, Ordering::Relaxed);
        counter!(self.name.clone(), "status" => outcome.label()).increment(delta);

        if let Some(span) = ctx.recording_span() {
            tracing::trace!(
                metric = %self.name,
                status = outcome.label(),
                trace_id = %span.trace_id(),
                span_id = %span.id(),
                "Counter incremented"
            );
        }
    }

    pub fn get(&self, outcome: Outcome) -> u64 {
        self.slot(outcome).load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.get(Outcome::Success) + self.get(Outcome::Failure)
    }

    fn slot(&self, outcome: Outcome) -> &AtomicU64 {
        match outcome {
            Outcome::Success => &self.success,
            Outcome::Failure => &self.failure,
        }
    }
}

/// Prometheus metric names: `[a-zA-Z_:][a-zA-Z0-9_:]*`.
fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}
