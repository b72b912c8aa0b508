//! Trace identifiers and the per-request trace context carrier.
//!
//! A `TraceContext` is an immutable value. Starting a span never mutates the
//! context it was started from; it returns a new context whose active span is
//! the new span.

use std::fmt;
use std::str::FromStr;

use opentelemetry::Context;
use rand::Rng;

use crate::observability::span::SpanRef;

/// 128-bit trace identifier. Zero is the invalid id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(u128);

impl TraceId {
    pub const INVALID: TraceId = TraceId(0);

    /// Generate a random, valid trace id.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let id: u128 = rng.gen();
            if id != 0 {
                return Self(id);
            }
        }
    }

    pub fn from_u128(id: u128) -> Self {
        Self(id)
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for TraceId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex(s, 32).map(Self)
    }
}

/// 64-bit span identifier. Zero is the invalid id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(u64);

impl SpanId {
    pub const INVALID: SpanId = SpanId(0);

    /// Generate a random, valid span id.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let id: u64 = rng.gen();
            if id != 0 {
                return Self(id);
            }
        }
    }

    pub fn from_u64(id: u64) -> Self {
        Self(id)
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for SpanId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex(s, 16).and_then(|v| u64::try_from(v).map_err(|_| IdParseError)).map(Self)
    }
}

impl From<opentelemetry::trace::TraceId> for TraceId {
    fn from(id: opentelemetry::trace::TraceId) -> Self {
        Self(u128::from_be_bytes(id.to_bytes()))
    }
}

impl From<TraceId> for opentelemetry::trace::TraceId {
    fn from(id: TraceId) -> Self {
        Self::from_bytes(id.0.to_be_bytes())
    }
}

impl From<opentelemetry::trace::SpanId> for SpanId {
    fn from(id: opentelemetry::trace::SpanId) -> Self {
        Self(u64::from_be_bytes(id.to_bytes()))
    }
}

impl From<SpanId> for opentelemetry::trace::SpanId {
    fn from(id: SpanId) -> Self {
        Self::from_bytes(id.0.to_be_bytes())
    }
}

/// Returned when an identifier is not fixed-width lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("identifier is not fixed-width lowercase hex")]
pub struct IdParseError;

fn parse_hex(s: &str, width: usize) -> Result<u128, IdParseError> {
    if s.len() != width || !s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        return Err(IdParseError);
    }
    u128::from_str_radix(s, 16).map_err(|_| IdParseError)
}

/// Per-request correlation handle.
#[derive(Debug, Clone)]
pub struct TraceContext {
    trace_id: TraceId,
    /// Span id of a caller in another process, taken from an inbound `traceparent`.
    remote_parent: Option<SpanId>,
    active: Option<SpanRef>,
    /// Inbound propagation state (baggage), carried unchanged to child contexts.
    carrier: Context,
}

impl TraceContext {
    /// A fresh, valid context with a new trace id and no active span.
    pub fn new_root() -> Self {
        Self {
            trace_id: TraceId::random(),
            remote_parent: None,
            active: None,
            carrier: Context::new(),
        }
    }

    /// Continue a trace started by a remote caller.
    pub fn remote(trace_id: TraceId, parent: SpanId) -> Self {
        if !trace_id.is_valid() || !parent.is_valid() {
            return Self::new_root();
        }
        Self {
            trace_id,
            remote_parent: Some(parent),
            active: None,
            carrier: Context::new(),
        }
    }

    /// A context with no tracing, e.g. for background work.
    pub fn invalid() -> Self {
        Self {
            trace_id: TraceId::INVALID,
            remote_parent: None,
            active: None,
            carrier: Context::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.trace_id.is_valid()
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub fn remote_parent(&self) -> Option<SpanId> {
        self.remote_parent
    }

    pub fn active_span(&self) -> Option<&SpanRef> {
        self.active.as_ref()
    }

    pub fn active_span_id(&self) -> Option<SpanId> {
        self.active.as_ref().map(SpanRef::id).filter(|id| id.is_valid())
    }

    /// The active span, if this context is valid and the span is still open
    /// and recording.
    pub fn recording_span(&self) -> Option<&SpanRef> {
        if !self.is_valid() {
            return None;
        }
        self.active
            .as_ref()
            .filter(|span| span.is_recording() && !span.is_ended())
    }

    pub(crate) fn carrier(&self) -> &Context {
        &self.carrier
    }

    pub(crate) fn with_carrier(mut self, carrier: Context) -> Self {
        self.carrier = carrier;
        self
    }

    pub(crate) fn with_active(&self, span: SpanRef) -> Self {
        Self {
            trace_id: self.trace_id,
            remote_parent: self.remote_parent,
            active: Some(span),
            carrier: self.carrier.clone(),
        }
    }
}
