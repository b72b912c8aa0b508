//! Span export.
//!
//! # Data Flow
//! ```text
//! Span::end → SpanExporter::export(SpanData)
//!     OtelExporter: replayed onto an OpenTelemetry SDK tracer with the same
//!         ids and timestamps → BatchSpanProcessor → OTLP/HTTP → collector
//!     InMemoryExporter: indexed by trace id (tests, local inspection)
//! ```
//!
//! # Design Decisions
//! - `export` never blocks the request path; the batch processor queues on
//!   its own thread and drops spans when the queue is full
//! - Shutdown flushes within a bounded grace window

use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use opentelemetry::trace::{
    Span as _, SpanContext, SpanKind, Status, TraceContextExt, TraceFlags, TraceState, Tracer as _,
    TracerProvider as _,
};
use opentelemetry::{Context, KeyValue as OtelKeyValue, Value};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{BatchConfig, BatchConfigBuilder, BatchSpanProcessor, Sampler, SdkTracer, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use tokio::time;

use crate::config::ObservabilityConfig;
use crate::observability::attributes::{AttributeValue, KeyValue};
use crate::observability::context::TraceId;
use crate::observability::span::{SpanData, StatusCode};
use crate::observability::TelemetryError;

/// Instrumentation scope name on every exported span.
pub const INSTRUMENTATION_SCOPE: &str = "order-telemetry";

/// Receives ended spans.
pub trait SpanExporter: Send + Sync {
    fn export(&self, span: SpanData);
}

/// Service identity stamped on every exported batch.
pub fn resource(config: &ObservabilityConfig) -> Resource {
    Resource::builder()
        .with_service_name(config.service_name.clone())
        .with_attributes([
            OtelKeyValue::new("service.version", config.service_version.clone()),
            OtelKeyValue::new("deployment.environment", config.environment.clone()),
        ])
        .build()
}

/// Batch size and schedule for the span processor.
pub fn batch_config(config: &ObservabilityConfig) -> BatchConfig {
    BatchConfigBuilder::default()
        .with_max_export_batch_size(config.export_batch_size)
        .with_scheduled_delay(Duration::from_millis(config.export_interval_ms))
        .build()
}

/// Hands ended spans to an OpenTelemetry tracer provider.
pub struct OtelExporter {
    provider: SdkTracerProvider,
    tracer: SdkTracer,
}

impl OtelExporter {
    /// Batch spans and ship them over OTLP/HTTP to `config.otlp_endpoint`.
    pub fn otlp(config: &ObservabilityConfig) -> Result<Self, TelemetryError> {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(config.otlp_endpoint.clone())
            .with_timeout(Duration::from_millis(config.export_timeout_ms))
            .build()
            .map_err(|e| TelemetryError::ExporterInstall(e.to_string()))?;

        let processor = BatchSpanProcessor::builder(exporter)
            .with_batch_config(batch_config(config))
            .build();
        let provider = SdkTracerProvider::builder()
            .with_span_processor(processor)
            .with_resource(resource(config))
            .with_sampler(Sampler::AlwaysOn)
            .build();

        tracing::info!(endpoint = %config.otlp_endpoint, "OTLP span exporter installed");
        Ok(Self::new(provider))
    }

    /// Export through an already configured provider.
    pub fn new(provider: SdkTracerProvider) -> Self {
        let tracer = provider.tracer(INSTRUMENTATION_SCOPE);
        Self { provider, tracer }
    }

    /// Flush queued spans and stop the provider, waiting at most `grace`.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), TelemetryError> {
        let provider = self.provider.clone();
        let flush = tokio::task::spawn_blocking(move || provider.shutdown());
        match time::timeout(grace, flush).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(TelemetryError::Export(e.to_string())),
            Ok(Err(e)) => Err(TelemetryError::Export(e.to_string())),
            Err(_) => Err(TelemetryError::FlushTimeout(grace)),
        }
    }
}

impl SpanExporter for OtelExporter {
    fn export(&self, span: SpanData) {
        let trace_id = opentelemetry::trace::TraceId::from(span.trace_id);
        let parent = match span.parent_span_id {
            Some(parent_id) => Context::new().with_remote_span_context(SpanContext::new(
                trace_id,
                parent_id.into(),
                TraceFlags::SAMPLED,
                true,
                TraceState::default(),
            )),
            None => Context::new(),
        };
        let kind = if span.attribute("http.method").is_some() {
            SpanKind::Server
        } else {
            SpanKind::Internal
        };

        let mut otel_span = self
            .tracer
            .span_builder(span.name.clone())
            .with_kind(kind)
            .with_trace_id(trace_id)
            .with_span_id(span.span_id.into())
            .with_start_time(SystemTime::from(span.start_time))
            .with_attributes(span.attributes.iter().map(to_otel))
            .start_with_context(&self.tracer, &parent);

        for event in &span.events {
            otel_span.add_event_with_timestamp(
                event.name.clone(),
                SystemTime::from(event.timestamp),
                event.attributes.iter().map(to_otel).collect(),
            );
        }
        otel_span.set_status(match span.status {
            StatusCode::Unset => Status::Unset,
            StatusCode::Ok => Status::Ok,
            StatusCode::Error => Status::error(span.status_message.clone()),
        });
        otel_span.end_with_timestamp(SystemTime::from(span.end_time));
    }
}

fn to_otel(kv: &KeyValue) -> OtelKeyValue {
    let value = match &kv.value {
        AttributeValue::String(s) => Value::from(s.clone()),
        AttributeValue::Int(i) => Value::I64(*i),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::Float(f) => Value::F64(*f),
    };
    OtelKeyValue::new(kv.key.clone(), value)
}

/// Keeps every exported span, indexed by trace id.
#[derive(Debug, Default)]
pub struct InMemoryExporter {
    spans: DashMap<TraceId, Vec<SpanData>>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans_for(&self, trace_id: TraceId) -> Vec<SpanData> {
        self.spans.get(&trace_id).map(|r| r.value().clone()).unwrap_or_default()
    }

    pub fn all(&self) -> Vec<SpanData> {
        self.spans.iter().flat_map(|r| r.value().clone()).collect()
    }

    /// Most recently exported span with the given name.
    pub fn find(&self, name: &str) -> Option<SpanData> {
        self.all()
            .into_iter()
            .filter(|s| s.name == name)
            .max_by_key(|s| s.end_time)
    }

    pub fn trace_count(&self) -> usize {
        self.spans.len()
    }

    pub fn len(&self) -> usize {
        self.spans.iter().map(|r| r.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.spans.clear();
    }
}

impl SpanExporter for InMemoryExporter {
    fn export(&self, span: SpanData) {
        self.spans.entry(span.trace_id).or_default().push(span);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::observability::context::TraceContext;
    use crate::observability::tracing::Tracer;
    use crate::observability::StatusCode as SpanStatus;
    use opentelemetry::trace::{SpanId as OtelSpanId, TraceId as OtelTraceId};
    use opentelemetry_sdk::trace::{InMemorySpanExporter, InMemorySpanExporterBuilder};

    fn otel_with_simple(memory: &InMemorySpanExporter) -> Arc<OtelExporter> {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(memory.clone())
            .build();
        Arc::new(OtelExporter::new(provider))
    }

    #[test]
    fn test_spans_keep_ids_parentage_and_status() {
        let memory = InMemorySpanExporter::default();
        let exporter = otel_with_simple(&memory);
        let tracer = Tracer::new(exporter);

        let (request_ctx, root) = tracer.start_span_with(
            &TraceContext::new_root(),
            "POST /createOrder",
            vec![KeyValue::string("http.method", "POST")],
        );
        let (_db_ctx, db) = tracer.start_span(&request_ctx, "db.insert_order");
        db.record_error("simulated database constraint violation", "database");
        db.set_status(SpanStatus::Error, "database error");
        db.end();
        root.set_status(SpanStatus::Ok, "");
        root.end();

        let spans = memory.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 2);
        let exported_db = spans.iter().find(|s| s.name == "db.insert_order").unwrap();
        let exported_root = spans.iter().find(|s| s.name == "POST /createOrder").unwrap();

        assert_eq!(exported_root.span_context.trace_id(), OtelTraceId::from(root.trace_id()));
        assert_eq!(exported_root.span_context.span_id(), OtelSpanId::from(root.id()));
        assert_eq!(exported_root.span_kind, SpanKind::Server);
        assert_eq!(exported_root.status, Status::Ok);

        assert_eq!(exported_db.span_context.trace_id(), OtelTraceId::from(root.trace_id()));
        assert_eq!(exported_db.span_context.span_id(), OtelSpanId::from(db.id()));
        assert_eq!(exported_db.parent_span_id, OtelSpanId::from(root.id()));
        assert_eq!(exported_db.span_kind, SpanKind::Internal);
        assert_eq!(exported_db.status, Status::error("database error"));
        assert!(exported_db.events.events.iter().any(|e| e.name == "exception"));
    }

    #[test]
    fn test_attributes_keep_their_types() {
        let memory = InMemorySpanExporter::default();
        let tracer = Tracer::new(otel_with_simple(&memory));
        let (_ctx, span) = tracer.start_span(&TraceContext::new_root(), "inventory.lookup");
        span.set_attribute(KeyValue::int("inventory.check.delay_ms", 300));
        span.end();

        let spans = memory.get_finished_spans().unwrap();
        let attr = spans[0]
            .attributes
            .iter()
            .find(|kv| kv.key.as_str() == "inventory.check.delay_ms")
            .unwrap();
        assert_eq!(attr.value, Value::I64(300));
    }

    #[tokio::test]
    async fn test_shutdown_flushes_queued_spans() {
        let memory = InMemorySpanExporterBuilder::new().keep_records_on_shutdown().build();
        let processor = BatchSpanProcessor::builder(memory.clone())
            .with_batch_config(
                BatchConfigBuilder::default()
                    .with_scheduled_delay(Duration::from_secs(3600))
                    .build(),
            )
            .build();
        let exporter = Arc::new(OtelExporter::new(
            SdkTracerProvider::builder().with_span_processor(processor).build(),
        ));
        let tracer = Tracer::new(exporter.clone());
        for _ in 0..3 {
            let (_ctx, span) = tracer.start_span(&TraceContext::new_root(), "stage");
            span.end();
        }

        exporter.shutdown(Duration::from_secs(5)).await.unwrap();
        assert_eq!(memory.get_finished_spans().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_twice_is_an_error() {
        let memory = InMemorySpanExporter::default();
        let exporter = otel_with_simple(&memory);
        exporter.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(exporter.shutdown(Duration::from_secs(1)).await.is_err());
    }

    #[test]
    fn test_otlp_exporter_builds_from_defaults() {
        let config = ObservabilityConfig::default();
        let exporter = OtelExporter::otlp(&config).unwrap();
        drop(exporter);
    }

    #[test]
    fn test_in_memory_indexes_by_trace() {
        let exporter = Arc::new(InMemoryExporter::new());
        let tracer = Tracer::new(exporter.clone());
        let a = TraceContext::new_root();
        let b = TraceContext::new_root();
        let (_c, s1) = tracer.start_span(&a, "one");
        let (_c, s2) = tracer.start_span(&b, "two");
        s1.end();
        s2.end();
        assert_eq!(exporter.trace_count(), 2);
        assert_eq!(exporter.spans_for(a.trace_id()).first().map(|s| s.name.as_str()), Some("one"));
        exporter.clear();
        assert!(exporter.is_empty());
    }
}
