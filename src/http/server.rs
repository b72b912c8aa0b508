//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with both endpoints
//! - Wire up middleware (request ID, root span, timeout)
//! - Bind server to listener
//! - Graceful shutdown on the lifecycle broadcast

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ServiceConfig;
use crate::http::handlers::{check_inventory, create_order};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer, trace_request};
use crate::observability::Instruments;
use crate::pipeline::{FailurePolicy, InventoryCheck, LatencyProfile, OrderPipeline, RandomSource};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub instruments: Instruments,
    pub orders: Arc<OrderPipeline>,
    pub inventory: Arc<InventoryCheck>,
}

impl AppState {
    pub fn new(config: &ServiceConfig, instruments: Instruments, random: Arc<dyn RandomSource>) -> Self {
        let latency = LatencyProfile::default();
        let orders = OrderPipeline::new(&instruments, random.clone(), FailurePolicy::from(&config.pipeline))
            .with_latency(latency);
        let inventory = InventoryCheck::new(&instruments, random, latency.inventory_lookup);
        Self {
            instruments,
            orders: Arc::new(orders),
            inventory: Arc::new(inventory),
        }
    }
}

/// HTTP server for the order service.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ServiceConfig, instruments: Instruments, random: Arc<dyn RandomSource>) -> Self {
        let state = AppState::new(&config, instruments, random);
        let router = Self::build_router(&config, state);
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ServiceConfig, state: AppState) -> Router {
        Router::new()
            .route("/createOrder", post(create_order))
            .route("/checkInventory", get(check_inventory))
            .route_layer(middleware::from_fn_with_state(state.clone(), trace_request))
            .with_state(state)
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                Duration::from_secs(config.timeouts.request_secs),
            ))
            .layer(propagate_request_id_layer())
            .layer(set_request_id_layer())
            .layer(TraceLayer::new_for_http())
    }

    /// The fully layered router, for driving requests without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
