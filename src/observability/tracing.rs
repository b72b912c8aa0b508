//! Span creation and W3C Trace Context propagation.
//!
//! # Responsibilities
//! - Start child spans under the active span of a `TraceContext`
//! - Extract trace context and baggage from inbound `traceparent` / `baggage`
//! - Render both headers for outgoing responses

use std::sync::Arc;

use crate::observability::attributes::KeyValue;
use crate::observability::context::TraceContext;
use crate::observability::export::SpanExporter;
use crate::observability::span::{Span, SpanRef};

/// Creates spans and hands ended spans to the exporter.
#[derive(Clone)]
pub struct Tracer {
    exporter: Arc<dyn SpanExporter>,
}

impl Tracer {
    pub fn new(exporter: Arc<dyn SpanExporter>) -> Self {
        Self { exporter }
    }

    /// Start a span named `name` under the active span of `parent`.
    ///
    /// Returns the child context (whose active span is the new span) and the
    /// owning span handle. `parent` is left untouched. An invalid `parent`
    /// yields a no-op span that records nothing.
    pub fn start_span(&self, parent: &TraceContext, name: impl Into<String>) -> (TraceContext, Span) {
        self.start_span_with(parent, name, Vec::new())
    }

    /// Like [`Tracer::start_span`], with initial attributes.
    pub fn start_span_with(
        &self,
        parent: &TraceContext,
        name: impl Into<String>,
        attributes: Vec<KeyValue>,
    ) -> (TraceContext, Span) {
        let name = name.into();
        let span = if parent.is_valid() {
            let parent_id = parent.active_span_id().or(parent.remote_parent());
            SpanRef::new(parent.trace_id(), parent_id, name, attributes, self.exporter.clone())
        } else {
            SpanRef::noop(name)
        };
        let child = parent.with_active(span.clone());
        (child, Span::new(span))
    }
}

/// W3C Trace Context and Baggage header handling.
pub mod propagation {
    use std::sync::OnceLock;

    use axum::http::{HeaderMap, HeaderName, HeaderValue};
    use opentelemetry::propagation::{Extractor, Injector, TextMapCompositePropagator, TextMapPropagator};
    use opentelemetry::trace::{SpanContext, TraceContextExt, TraceFlags, TraceState};
    use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};

    use crate::observability::context::TraceContext;

    pub const TRACEPARENT: &str = "traceparent";
    pub const BAGGAGE: &str = "baggage";

    fn propagator() -> &'static TextMapCompositePropagator {
        static PROPAGATOR: OnceLock<TextMapCompositePropagator> = OnceLock::new();
        PROPAGATOR.get_or_init(|| {
            TextMapCompositePropagator::new(vec![
                Box::new(TraceContextPropagator::new()),
                Box::new(BaggagePropagator::new()),
            ])
        })
    }

    struct HeaderExtractor<'a>(&'a HeaderMap);

    impl Extractor for HeaderExtractor<'_> {
        fn get(&self, key: &str) -> Option<&str> {
            self.0.get(key).and_then(|v| v.to_str().ok())
        }

        fn keys(&self) -> Vec<&str> {
            self.0.keys().map(HeaderName::as_str).collect()
        }
    }

    struct HeaderInjector<'a>(&'a mut HeaderMap);

    impl Injector for HeaderInjector<'_> {
        fn set(&mut self, key: &str, value: String) {
            if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(key.as_bytes()), HeaderValue::from_str(&value)) {
                self.0.insert(name, value);
            }
        }
    }

    /// Build the context for an inbound request.
    ///
    /// A valid `traceparent` joins the caller's trace; anything else starts a
    /// new one. Inbound `baggage` is kept on the context either way.
    pub fn extract(headers: &HeaderMap) -> TraceContext {
        let carrier = propagator().extract(&HeaderExtractor(headers));
        let remote = carrier.span().span_context().clone();
        let ctx = if remote.is_valid() {
            TraceContext::remote(remote.trace_id().into(), remote.span_id().into())
        } else {
            TraceContext::new_root()
        };
        ctx.with_carrier(carrier)
    }

    /// Write `traceparent` for the active span of `ctx`, and any baggage it
    /// carries, into `headers`.
    pub fn inject(ctx: &TraceContext, headers: &mut HeaderMap) {
        if !ctx.is_valid() {
            return;
        }
        let Some(span_id) = ctx.active_span_id() else {
            return;
        };
        let span_context = SpanContext::new(
            ctx.trace_id().into(),
            span_id.into(),
            TraceFlags::SAMPLED,
            false,
            TraceState::default(),
        );
        let cx = ctx.carrier().with_remote_span_context(span_context);
        propagator().inject_context(&cx, &mut HeaderInjector(headers));
    }
}
