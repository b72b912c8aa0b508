//! Span lifecycle.
//!
//! # Lifecycle
//! ```text
//! Tracer::start_span → open (events, status, error may change)
//!                    → Span::end (end_time stamped once, snapshot exported)
//! ```
//!
//! `Span` is the owning handle held by the stage that opened it. `SpanRef` is a
//! cheap clone carried by `TraceContext` so loggers and callers further down
//! can attach events or set the status. Only the owner can end the span.
//! Dropping an owner that was never ended closes the span as cancelled.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::observability::attributes::KeyValue;
use crate::observability::context::{SpanId, TraceId};
use crate::observability::export::SpanExporter;

/// Final disposition of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusCode {
    Unset,
    Ok,
    Error,
}

/// A failure recorded on a span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedError {
    pub message: String,
    pub stage: String,
}

/// A timestamped annotation attached while the span is open.
#[derive(Debug, Clone, Serialize)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(serialize_with = "serialize_attributes")]
    pub attributes: Vec<KeyValue>,
}

/// Immutable snapshot of an ended span, handed to the exporter.
#[derive(Debug, Clone, Serialize)]
pub struct SpanData {
    #[serde(serialize_with = "serialize_display")]
    pub trace_id: TraceId,
    #[serde(serialize_with = "serialize_display")]
    pub span_id: SpanId,
    #[serde(serialize_with = "serialize_optional_display")]
    pub parent_span_id: Option<SpanId>,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: StatusCode,
    pub status_message: String,
    pub error: Option<RecordedError>,
    pub events: Vec<SpanEvent>,
    #[serde(serialize_with = "serialize_attributes")]
    pub attributes: Vec<KeyValue>,
}

impl SpanData {
    pub fn duration(&self) -> chrono::Duration {
        self.end_time - self.start_time
    }

    pub fn attribute(&self, key: &str) -> Option<&KeyValue> {
        self.attributes.iter().rev().find(|kv| kv.key == key)
    }
}

#[derive(Debug)]
struct SpanState {
    status: StatusCode,
    status_message: String,
    error: Option<RecordedError>,
    events: Vec<SpanEvent>,
    attributes: Vec<KeyValue>,
    end_time: Option<DateTime<Utc>>,
}

struct SpanInner {
    trace_id: TraceId,
    id: SpanId,
    parent_id: Option<SpanId>,
    name: String,
    start_time: DateTime<Utc>,
    recording: bool,
    state: Mutex<SpanState>,
    exporter: Option<Arc<dyn SpanExporter>>,
}

/// Shared, non-owning handle to a span.
#[derive(Clone)]
pub struct SpanRef(Arc<SpanInner>);

impl SpanRef {
    pub(crate) fn new(
        trace_id: TraceId,
        parent_id: Option<SpanId>,
        name: String,
        attributes: Vec<KeyValue>,
        exporter: Arc<dyn SpanExporter>,
    ) -> Self {
        Self(Arc::new(SpanInner {
            trace_id,
            id: SpanId::random(),
            parent_id,
            name,
            start_time: Utc::now(),
            recording: true,
            state: Mutex::new(SpanState::new(attributes)),
            exporter: Some(exporter),
        }))
    }

    /// A span that records nothing. Used when the parent context is invalid.
    pub(crate) fn noop(name: String) -> Self {
        Self(Arc::new(SpanInner {
            trace_id: TraceId::INVALID,
            id: SpanId::INVALID,
            parent_id: None,
            name,
            start_time: Utc::now(),
            recording: false,
            state: Mutex::new(SpanState::new(Vec::new())),
            exporter: None,
        }))
    }

    pub fn id(&self) -> SpanId {
        self.0.id
    }

    pub fn trace_id(&self) -> TraceId {
        self.0.trace_id
    }

    pub fn parent_id(&self) -> Option<SpanId> {
        self.0.parent_id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.0.start_time
    }

    pub fn is_recording(&self) -> bool {
        self.0.recording
    }

    pub fn is_ended(&self) -> bool {
        self.state().end_time.is_some()
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.state().end_time
    }

    pub fn status(&self) -> StatusCode {
        self.state().status
    }

    pub fn status_message(&self) -> String {
        self.state().status_message.clone()
    }

    pub fn error(&self) -> Option<RecordedError> {
        self.state().error.clone()
    }

    pub fn events(&self) -> Vec<SpanEvent> {
        self.state().events.clone()
    }

    /// Set the status. Later calls overwrite earlier ones until the span ends.
    pub fn set_status(&self, code: StatusCode, message: impl Into<String>) {
        self.with_open_state(|state| {
            state.status = code;
            state.status_message = message.into();
        });
    }

    /// Attach a failure payload. Callers follow up with `set_status(Error, ..)`.
    pub fn record_error(&self, message: impl Into<String>, stage: impl Into<String>) {
        let error = RecordedError {
            message: message.into(),
            stage: stage.into(),
        };
        self.with_open_state(|state| {
            state.events.push(SpanEvent {
                name: "exception".to_string(),
                timestamp: Utc::now(),
                attributes: vec![
                    KeyValue::string("exception.message", error.message.clone()),
                    KeyValue::string("stage", error.stage.clone()),
                ],
            });
            state.error = Some(error);
        });
    }

    pub fn add_event(&self, name: impl Into<String>, attributes: Vec<KeyValue>) {
        let name = name.into();
        self.with_open_state(|state| {
            state.events.push(SpanEvent {
                name,
                timestamp: Utc::now(),
                attributes,
            });
        });
    }

    pub fn set_attribute(&self, attribute: KeyValue) {
        self.with_open_state(|state| state.attributes.push(attribute));
    }

    /// Stamp `end_time` and export. Ending twice is a no-op.
    fn end(&self) {
        if !self.0.recording {
            return;
        }
        let snapshot = {
            let mut state = self.state();
            if state.end_time.is_some() {
                return;
            }
            let end_time = Utc::now().max(self.0.start_time);
            state.end_time = Some(end_time);
            self.snapshot(&state, end_time)
        };
        if let Some(exporter) = &self.0.exporter {
            exporter.export(snapshot);
        }
    }

    fn snapshot(&self, state: &SpanState, end_time: DateTime<Utc>) -> SpanData {
        SpanData {
            trace_id: self.0.trace_id,
            span_id: self.0.id,
            parent_span_id: self.0.parent_id,
            name: self.0.name.clone(),
            start_time: self.0.start_time,
            end_time,
            status: state.status,
            status_message: state.status_message.clone(),
            error: state.error.clone(),
            events: state.events.clone(),
            attributes: state.attributes.clone(),
        }
    }

    fn with_open_state(&self, f: impl FnOnce(&mut SpanState)) {
        if !self.0.recording {
            return;
        }
        let mut state = self.state();
        if state.end_time.is_none() {
            f(&mut state);
        }
    }

    fn state(&self) -> MutexGuard<'_, SpanState> {
        self.0.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SpanRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanRef")
            .field("trace_id", &self.0.trace_id)
            .field("id", &self.0.id)
            .field("parent_id", &self.0.parent_id)
            .field("name", &self.0.name)
            .field("recording", &self.0.recording)
            .finish()
    }
}

impl SpanState {
    fn new(attributes: Vec<KeyValue>) -> Self {
        Self {
            status: StatusCode::Unset,
            status_message: String::new(),
            error: None,
            events: Vec::new(),
            attributes,
            end_time: None,
        }
    }
}

/// Owning handle to an open span. The scope that started the span ends it.
#[derive(Debug)]
pub struct Span {
    inner: SpanRef,
}

impl Span {
    pub(crate) fn new(inner: SpanRef) -> Self {
        Self { inner }
    }

    /// Close the span. Calling it more than once is a no-op.
    pub fn end(&self) {
        self.inner.end();
    }

    pub fn handle(&self) -> SpanRef {
        self.inner.clone()
    }
}

impl Deref for Span {
    type Target = SpanRef;

    fn deref(&self) -> &SpanRef {
        &self.inner
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        if self.inner.is_recording() && !self.inner.is_ended() {
            self.inner.set_status(StatusCode::Error, "cancelled");
            self.inner.end();
        }
    }
}

fn serialize_display<T: fmt::Display, S: serde::Serializer>(value: &T, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(value)
}

fn serialize_optional_display<T: fmt::Display, S: serde::Serializer>(
    value: &Option<T>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => s.collect_str(v),
        None => s.serialize_none(),
    }
}

fn serialize_attributes<S: serde::Serializer>(attrs: &[KeyValue], s: S) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeMap;
    let mut map = s.serialize_map(Some(attrs.len()))?;
    for kv in attrs {
        map.serialize_entry(&kv.key, &kv.value)?;
    }
    map.end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::context::TraceContext;
    use crate::observability::export::InMemoryExporter;
    use crate::observability::tracing::Tracer;

    fn tracer() -> (Tracer, Arc<InMemoryExporter>) {
        let exporter = Arc::new(InMemoryExporter::new());
        (Tracer::new(exporter.clone()), exporter)
    }

    #[test]
    fn test_end_is_idempotent() {
        let (tracer, exporter) = tracer();
        let (_ctx, span) = tracer.start_span(&TraceContext::new_root(), "db.insert_order");
        span.set_status(StatusCode::Ok, "done");
        span.end();
        let first_end = span.end_time();
        span.set_status(StatusCode::Error, "late");
        span.end();
        assert_eq!(span.end_time(), first_end);
        assert_eq!(span.status(), StatusCode::Ok);
        assert_eq!(exporter.len(), 1);
    }

    #[test]
    fn test_status_overwrites_while_open() {
        let (tracer, _exporter) = tracer();
        let (_ctx, span) = tracer.start_span(&TraceContext::new_root(), "payment.process");
        assert_eq!(span.status(), StatusCode::Unset);
        span.set_status(StatusCode::Ok, "");
        span.set_status(StatusCode::Error, "provider down");
        assert_eq!(span.status(), StatusCode::Error);
        assert_eq!(span.status_message(), "provider down");
        span.end();
    }

    #[test]
    fn test_record_error() {
        let (tracer, exporter) = tracer();
        let (_ctx, span) = tracer.start_span(&TraceContext::new_root(), "db.insert_order");
        span.record_error("simulated database constraint violation", "database");
        span.set_status(StatusCode::Error, "database operation failed");
        span.end();

        let data = exporter.find("db.insert_order").unwrap();
        let error = data.error.unwrap();
        assert_eq!(error.message, "simulated database constraint violation");
        assert_eq!(error.stage, "database");
        assert_eq!(data.events[0].name, "exception");
    }

    #[test]
    fn test_events_after_end_are_dropped() {
        let (tracer, _exporter) = tracer();
        let (_ctx, span) = tracer.start_span(&TraceContext::new_root(), "stage");
        span.add_event("log", vec![]);
        span.end();
        span.add_event("log", vec![]);
        assert_eq!(span.events().len(), 1);
    }

    #[test]
    fn test_drop_without_end_marks_cancelled() {
        let (tracer, exporter) = tracer();
        {
            let (_ctx, _span) = tracer.start_span(&TraceContext::new_root(), "abandoned");
        }
        let data = exporter.find("abandoned").unwrap();
        assert_eq!(data.status, StatusCode::Error);
        assert_eq!(data.status_message, "cancelled");
    }

    #[test]
    fn test_concurrent_event_append() {
        let (tracer, _exporter) = tracer();
        let (_ctx, span) = tracer.start_span(&TraceContext::new_root(), "parent");
        let handle = span.handle();
        std::thread::scope(|s| {
            for _ in 0..8 {
                let h = handle.clone();
                s.spawn(move || {
                    for _ in 0..50 {
                        h.add_event("log", vec![]);
                    }
                });
            }
        });
        assert_eq!(span.events().len(), 400);
        span.end();
    }

    #[test]
    fn test_span_data_serializes_hex_ids() {
        let (tracer, exporter) = tracer();
        let (_ctx, span) = tracer.start_span(&TraceContext::new_root(), "root");
        span.set_attribute(KeyValue::int("http.status_code", 200));
        span.end();
        let data = exporter.find("root").unwrap();
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["span_id"].as_str().unwrap().len(), 16);
        assert_eq!(json["trace_id"].as_str().unwrap().len(), 32);
        assert!(json["parent_span_id"].is_null());
        assert_eq!(json["attributes"]["http.status_code"], 200);
    }
}
