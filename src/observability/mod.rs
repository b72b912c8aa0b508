//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → tracing.rs (root span, traceparent and baggage extraction)
//!     → context.rs (TraceContext threaded through every call)
//!     → span.rs (child span per stage, explicit end)
//!     → logging.rs (DualSinkLogger: span event + durable JSON line)
//!     → metrics.rs (OutcomeCounter, HTTP metrics)
//!
//! Ended spans → export.rs (OpenTelemetry SDK → batch processor → OTLP/HTTP)
//! ```
//!
//! # Design Decisions
//! - Logger, counter and tracer are built once by the composition root and
//!   injected; there are no ambient globals besides the metrics recorder
//! - Contexts are immutable values; starting a span returns a new context
//! - Telemetry setup failures are fatal, sink failures are not

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub mod attributes;
pub mod context;
pub mod export;
pub mod logging;
pub mod metrics;
pub mod sink;
pub mod span;
pub mod tracing;

pub use attributes::KeyValue;
pub use context::{SpanId, TraceContext, TraceId};
pub use logging::{DualSinkLogger, LogLevel};
pub use metrics::{Outcome, OutcomeCounter};
pub use span::{Span, SpanRef, StatusCode};
pub use self::tracing::Tracer;

/// Errors raised while setting up or shutting down telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to install metrics recorder: {0}")]
    MetricsInstall(String),

    #[error("invalid instrument name: {0:?}")]
    InvalidInstrument(String),

    #[error("failed to build span exporter: {0}")]
    ExporterInstall(String),

    #[error("span export failed: {0}")]
    Export(String),

    #[error("telemetry flush did not finish within {0:?}")]
    FlushTimeout(Duration),
}

/// The instrumentation handles shared by every request.
#[derive(Clone)]
pub struct Instruments {
    pub tracer: Tracer,
    pub logger: Arc<DualSinkLogger>,
    pub orders_processed: Arc<OutcomeCounter>,
}
