//! Concurrent load against /createOrder.

use std::sync::Arc;

use reqwest::StatusCode;

use order_telemetry::config::ServiceConfig;
use order_telemetry::observability::Outcome;
use order_telemetry::pipeline::SeededRandom;

mod common;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_orders_are_each_counted_once() {
    let app = common::spawn_app(Arc::new(SeededRandom::new(2024))).await;
    let total = 60;

    let mut tasks = Vec::new();
    for _ in 0..total {
        let client = app.client.clone();
        let url = app.url("/createOrder");
        tasks.push(tokio::spawn(async move { client.post(url).send().await.unwrap().status() }));
    }

    let mut ok = 0;
    let mut failed = 0;
    for task in tasks {
        match task.await.unwrap() {
            StatusCode::OK => ok += 1,
            StatusCode::INTERNAL_SERVER_ERROR => failed += 1,
            other => panic!("unexpected status {}", other),
        }
    }

    assert_eq!(ok + failed, total);
    assert_eq!(app.counter.get(Outcome::Success), ok);
    assert_eq!(app.counter.get(Outcome::Failure), failed);
    assert_eq!(app.spans.trace_count() as u64, total);
    app.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failure_disabled_means_every_order_succeeds() {
    let mut config = ServiceConfig::default();
    config.pipeline.failure_buckets = 0;
    let app = common::spawn_app_with(config, Arc::new(SeededRandom::new(1))).await;

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let client = app.client.clone();
        let url = app.url("/createOrder");
        tasks.push(tokio::spawn(async move { client.post(url).send().await.unwrap().status() }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), StatusCode::OK);
    }

    assert_eq!(app.counter.get(Outcome::Success), 20);
    assert_eq!(app.counter.get(Outcome::Failure), 0);
    app.stop().await;
}
