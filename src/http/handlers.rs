//! Endpoint handlers.

use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::Response,
};
use serde::{Deserialize, Serialize};

use crate::http::response;
use crate::http::server::AppState;
use crate::observability::{KeyValue, TraceContext};
use crate::pipeline::OrderOutcome;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InventoryResponse {
    pub status: String,
    pub message: String,
    pub delay_ms: u64,
}

/// `POST /createOrder`
pub async fn create_order(State(state): State<AppState>, Extension(ctx): Extension<TraceContext>) -> Response {
    let report = match state.orders.create_order(&ctx).await {
        Ok(report) => report,
        Err(e) => {
            state.instruments.logger.error(
                &ctx,
                "order pipeline aborted",
                &[KeyValue::string("error.reason", e.to_string())],
            );
            return response::internal_error();
        }
    };

    match report.outcome {
        OrderOutcome::Success => response::json(
            &ctx,
            &state.instruments.logger,
            StatusCode::OK,
            &OrderResponse {
                status: "success".to_string(),
                message: "Order created successfully".to_string(),
            },
        ),
        OrderOutcome::DbFailure | OrderOutcome::PaymentFailure => response::internal_error(),
    }
}

/// `GET /checkInventory`
pub async fn check_inventory(State(state): State<AppState>, Extension(ctx): Extension<TraceContext>) -> Response {
    let report = state.inventory.check(&ctx).await;
    response::json(
        &ctx,
        &state.instruments.logger,
        StatusCode::OK,
        &InventoryResponse {
            status: "success".to_string(),
            message: "Inventory checked successfully".to_string(),
            delay_ms: report.delay_ms,
        },
    )
}
