//! Order service (v1)
//!
//! A simulated order backend where every request is traced, logged and
//! counted with correlated identifiers.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http (request id, root span, timeout)
//!                        │
//!                        ▼
//!                     pipeline (createOrder / checkInventory)
//!                        │   child spans, simulated latency, failure draw
//!                        ▼
//!     ◀────────────── response (JSON or generic 500)
//!
//!     Cross-cutting: observability
//!         tracer ──▶ batch span processor ──▶ OTLP/HTTP collector
//!         logger ──▶ span events + app.log (JSON lines)
//!         counter ─▶ orders_processed_total{status}
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use order_telemetry::config::load_config;
use order_telemetry::http::HttpServer;
use order_telemetry::lifecycle::{wait_for_shutdown, Shutdown};
use order_telemetry::observability::export::OtelExporter;
use order_telemetry::observability::logging::init_logging;
use order_telemetry::observability::metrics::init_metrics;
use order_telemetry::observability::sink::TracingConsole;
use order_telemetry::observability::{DualSinkLogger, Instruments, Outcome, OutcomeCounter, Tracer};
use order_telemetry::pipeline::{RandomSource, SeededRandom, ThreadRandom};

#[derive(Parser)]
#[command(name = "order-telemetry")]
#[command(about = "Simulated order service with correlated traces, logs and metrics", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    init_logging(&config.logging.level);
    tracing::info!(
        service = %config.observability.service_name,
        version = %config.observability.service_version,
        "order-telemetry starting"
    );
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        log_file = %config.logging.file_path,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        init_metrics(addr)?;
        tracing::info!(address = %addr, "Metrics endpoint listening");
    }
    let orders_processed = Arc::new(OutcomeCounter::orders_processed()?);

    let exporter = Arc::new(OtelExporter::otlp(&config.observability)?);
    let logger = Arc::new(DualSinkLogger::open(
        Path::new(&config.logging.file_path),
        Arc::new(TracingConsole),
    ));
    let instruments = Instruments {
        tracer: Tracer::new(exporter.clone()),
        logger,
        orders_processed: orders_processed.clone(),
    };

    let random: Arc<dyn RandomSource> = match config.pipeline.seed {
        Some(seed) => {
            tracing::info!(seed, "Using seeded random source");
            Arc::new(SeededRandom::new(seed))
        }
        None => Arc::new(ThreadRandom),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let grace = Duration::from_secs(config.shutdown.grace_secs);
    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, instruments, random);
    let server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    wait_for_shutdown().await;
    shutdown.trigger();

    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "HTTP server failed"),
        Err(e) => tracing::error!(error = %e, "HTTP server task panicked"),
    }

    match exporter.shutdown(grace).await {
        Ok(()) => tracing::info!("Span exporter flushed"),
        Err(e) => tracing::warn!(error = %e, "Span exporter did not flush cleanly"),
    }

    tracing::info!(
        success = orders_processed.get(Outcome::Success),
        failure = orders_processed.get(Outcome::Failure),
        "Shutdown complete"
    );
    Ok(())
}
