//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use order_telemetry::config::ServiceConfig;
use order_telemetry::http::HttpServer;
use order_telemetry::lifecycle::Shutdown;
use order_telemetry::observability::export::InMemoryExporter;
use order_telemetry::observability::sink::{MemoryConsole, MemorySink};
use order_telemetry::observability::{DualSinkLogger, Instruments, OutcomeCounter, Tracer};
use order_telemetry::pipeline::RandomSource;

/// A running service on an ephemeral port with in-memory telemetry sinks.
pub struct TestApp {
    pub addr: SocketAddr,
    pub spans: Arc<InMemoryExporter>,
    pub durable: Arc<MemorySink>,
    pub console: Arc<MemoryConsole>,
    pub counter: Arc<OutcomeCounter>,
    pub client: reqwest::Client,
    shutdown: Shutdown,
    server: JoinHandle<Result<(), std::io::Error>>,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = self.server.await;
    }
}

/// Spawn the service with the given random source and default config.
pub async fn spawn_app(random: Arc<dyn RandomSource>) -> TestApp {
    spawn_app_with(ServiceConfig::default(), random).await
}

pub async fn spawn_app_with(config: ServiceConfig, random: Arc<dyn RandomSource>) -> TestApp {
    let spans = Arc::new(InMemoryExporter::new());
    let durable = Arc::new(MemorySink::new());
    let console = Arc::new(MemoryConsole::new());
    let counter = Arc::new(OutcomeCounter::orders_processed().unwrap());

    let instruments = Instruments {
        tracer: Tracer::new(spans.clone()),
        logger: Arc::new(DualSinkLogger::new(durable.clone(), console.clone())),
        orders_processed: counter.clone(),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = tokio::spawn(HttpServer::new(config, instruments, random).run(listener, shutdown.subscribe()));

    TestApp {
        addr,
        spans,
        durable,
        console,
        counter,
        client: reqwest::Client::new(),
        shutdown,
        server,
    }
}
