//! Request instrumentation.
//!
//! # Responsibilities
//! - Request ID layers (UUID v4, propagated to the response)
//! - Root span per request: joins an inbound `traceparent` or starts a trace,
//!   keeping inbound `baggage` for the response
//! - Expose the request's `TraceContext` to handlers via extensions
//! - Record HTTP metrics
//!
//! # Design Decisions
//! - Runs as a route layer so the matched route names the span
//! - The root span is ended before the response leaves the middleware
//! - A 5xx response with an Unset root status marks the span as Error

use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{HeaderName, Request},
    middleware::Next,
    response::Response,
};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use uuid::Uuid;

use crate::http::server::AppState;
use crate::observability::metrics;
use crate::observability::tracing::propagation;
use crate::observability::{KeyValue, StatusCode as SpanStatus};

pub const X_REQUEST_ID: &str = "x-request-id";

/// Generates a request id when the caller did not send one.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID), MakeRequestUuid)
}

/// Copies the request id onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID))
}

/// Open the root span for a request and close it once the handler responds.
pub async fn trace_request(State(state): State<AppState>, mut request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let parent = propagation::extract(request.headers());
    let (ctx, root) = state.instruments.tracer.start_span_with(
        &parent,
        format!("{} {}", method, route),
        vec![
            KeyValue::string("http.method", method.clone()),
            KeyValue::string("http.route", route.clone()),
            KeyValue::string("http.request_id", request_id.clone()),
        ],
    );

    tracing::debug!(
        request_id = %request_id,
        trace_id = %ctx.trace_id(),
        method = %method,
        route = %route,
        "Handling request"
    );

    request.extensions_mut().insert(ctx.clone());
    let mut response = next.run(request).await;

    let status = response.status();
    root.set_attribute(KeyValue::int("http.status_code", i64::from(status.as_u16())));
    if status.is_server_error() && root.status() == SpanStatus::Unset {
        root.set_status(SpanStatus::Error, status.to_string());
    }
    propagation::inject(&ctx, response.headers_mut());
    root.end();

    metrics::record_request(&method, &route, status.as_u16(), start);
    response
}
