//! Response construction.
//!
//! # Responsibilities
//! - Serialize JSON bodies, logging encoding failures through both sinks
//! - Map every failure to a generic 500 so no internal detail leaks
//!
//! # Design Decisions
//! - An encoding failure keeps the status the handler chose and sends an
//!   empty body

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::observability::{DualSinkLogger, KeyValue, TraceContext};

pub const INTERNAL_SERVER_ERROR: &str = "Internal Server Error";

/// Plain-text 500 with no detail.
pub fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_SERVER_ERROR).into_response()
}

/// Serialize `body` as JSON with `status`.
pub fn json<T: Serialize>(ctx: &TraceContext, logger: &DualSinkLogger, status: StatusCode, body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => {
            let mut response = (status, Body::from(bytes)).into_response();
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            logger.error(
                ctx,
                "Error encoding response",
                &[KeyValue::string("error.reason", e.to_string())],
            );
            (status, Body::empty()).into_response()
        }
    }
}
