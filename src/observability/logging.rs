//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the process `tracing` subscriber
//! - `DualSinkLogger`: every record goes to the active span as a `log` event
//!   and to the durable JSON-lines sink, both tagged with trace/span ids
//!
//! # Sinks
//! ```text
//! DualSinkLogger::{info,error}(ctx, message, attrs)
//!     → sink 1: recording span on ctx ? span.add_event("log", ..) : console line
//!     → sink 2: durable sink available ? JSON line : console line
//! ```
//!
//! # Design Decisions
//! - Both sinks are written synchronously before returning
//! - A failing durable sink warns once per outage and never blocks the span sink

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::observability::attributes::{self, KeyValue};
use crate::observability::context::{SpanId, TraceContext, TraceId};
use crate::observability::sink::{ConsoleSink, DurableSink, FileSink, SinkError};

/// Initialize the tracing subscriber. `RUST_LOG` overrides `level`.
pub fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("order_telemetry={level},tower_http={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured log entry. Constructed, written to both sinks, discarded.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub attributes: Vec<KeyValue>,
    pub trace_id: Option<TraceId>,
    pub span_id: Option<SpanId>,
}

#[derive(Serialize)]
struct JsonLine<'a> {
    timestamp: String,
    level: LogLevel,
    message: &'a str,
    attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    span_id: Option<String>,
}

impl LogRecord {
    /// Build a record, tagging it with the ids of the recording span on `ctx`.
    pub fn new(ctx: &TraceContext, level: LogLevel, message: impl Into<String>, attributes: Vec<KeyValue>) -> Self {
        let span = ctx.recording_span();
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            attributes,
            trace_id: span.map(|s| s.trace_id()),
            span_id: span.map(|s| s.id()),
        }
    }

    /// Render as one JSON object with no trailing newline.
    pub fn to_json_line(&self) -> Result<String, SinkError> {
        let line = JsonLine {
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            level: self.level,
            message: &self.message,
            attributes: attributes::to_json_map(&self.attributes),
            trace_id: self.trace_id.map(|id| id.to_string()),
            span_id: self.span_id.map(|id| id.to_string()),
        };
        Ok(serde_json::to_string(&line)?)
    }

    /// Untagged single-line rendering for the console fallback.
    pub fn console_line(&self) -> String {
        format!("[{}] {} {}", self.level, self.message, attributes::render(&self.attributes))
    }

    /// Attributes for the span event: level and message first, then the caller's.
    fn event_attributes(&self) -> Vec<KeyValue> {
        let mut attrs = Vec::with_capacity(self.attributes.len() + 2);
        attrs.push(KeyValue::string("log.level", self.level.as_str()));
        attrs.push(KeyValue::string("log.message", self.message.clone()));
        attrs.extend(self.attributes.iter().cloned());
        attrs
    }
}

/// Logger writing every record to the active span and a durable sink.
#[derive(Clone)]
pub struct DualSinkLogger {
    durable: Option<Arc<dyn DurableSink>>,
    console: Arc<dyn ConsoleSink>,
    /// Set while the durable sink is failing; cleared on the next good write.
    durable_failing: Arc<AtomicBool>,
}

impl DualSinkLogger {
    pub fn new(durable: Arc<dyn DurableSink>, console: Arc<dyn ConsoleSink>) -> Self {
        Self {
            durable: Some(durable),
            console,
            durable_failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A logger whose durable sink is the console fallback.
    pub fn console_only(console: Arc<dyn ConsoleSink>) -> Self {
        Self {
            durable: None,
            console,
            durable_failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open the log file at `path`. If it cannot be opened, the durable sink
    /// degrades to the console and a single startup warning is emitted.
    pub fn open(path: &Path, console: Arc<dyn ConsoleSink>) -> Self {
        match FileSink::open(path) {
            Ok(sink) => {
                tracing::info!(path = %path.display(), "Durable log file opened");
                Self::new(Arc::new(sink), console)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Could not open log file; durable logs fall back to console"
                );
                Self::console_only(console)
            }
        }
    }

    pub fn has_durable_sink(&self) -> bool {
        self.durable.is_some()
    }

    pub fn info(&self, ctx: &TraceContext, message: impl Into<String>, attrs: &[KeyValue]) {
        self.log(ctx, LogLevel::Info, message.into(), attrs);
    }

    pub fn error(&self, ctx: &TraceContext, message: impl Into<String>, attrs: &[KeyValue]) {
        self.log(ctx, LogLevel::Error, message.into(), attrs);
    }

    fn log(&self, ctx: &TraceContext, level: LogLevel, message: String, attrs: &[KeyValue]) {
        let record = LogRecord::new(ctx, level, message, attrs.to_vec());
        self.write_span_event(ctx, &record);
        self.write_durable(&record);
    }

    fn write_span_event(&self, ctx: &TraceContext, record: &LogRecord) {
        match ctx.recording_span() {
            Some(span) => span.add_event("log", record.event_attributes()),
            None => self.console.write_line(record.level, &record.console_line()),
        }
    }

    fn write_durable(&self, record: &LogRecord) {
        let Some(durable) = &self.durable else {
            self.console.write_line(record.level, &record.console_line());
            return;
        };
        match record.to_json_line().and_then(|line| durable.append(&line)) {
            Ok(()) => {
                if self.durable_failing.swap(false, Ordering::AcqRel) {
                    tracing::info!(sink = %durable.describe(), "Durable log writes recovered");
                }
            }
            Err(e) => {
                if !self.durable_failing.swap(true, Ordering::AcqRel) {
                    tracing::warn!(sink = %durable.describe(), error = %e, "Durable log write failed");
                }
                self.console.write_line(record.level, &record.console_line());
            }
        }
    }
}
