//! createOrder pipeline.
//!
//! Drives one request through validation, the order insert and the payment
//! call, opening a child span per stage and injecting failures per the
//! `FailurePolicy`. Every branch closes the spans it opened with a definitive
//! status, increments the outcome counter exactly once and sets the status of
//! the request's root span.

use std::sync::Arc;
use std::time::Duration;

use crate::observability::{
    DualSinkLogger, Instruments, KeyValue, OutcomeCounter, Span, StatusCode, TraceContext, Tracer,
};
use crate::pipeline::policy::{FailurePolicy, LatencyProfile, LatencyRange, OrderPath};
use crate::pipeline::random::RandomSource;
use crate::pipeline::state::{OrderOutcome, OrderRun, PipelineError, Stage};

pub const DB_SPAN: &str = "db.insert_order";
pub const PAYMENT_SPAN: &str = "payment.process";

const ORDER_ID_MAX: u64 = 999;

/// A failed stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StageFailure {
    stage: &'static str,
    message: &'static str,
    reason: &'static str,
    outcome: OrderOutcome,
}

const DB_FAILURE: StageFailure = StageFailure {
    stage: "database",
    message: "database operation failed",
    reason: "simulated database constraint violation",
    outcome: OrderOutcome::DbFailure,
};

const PAYMENT_FAILURE: StageFailure = StageFailure {
    stage: "payment",
    message: "payment processing failed",
    reason: "simulated payment provider error",
    outcome: OrderOutcome::PaymentFailure,
};

/// What happened to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderReport {
    pub outcome: OrderOutcome,
    /// Synthetic order id in `[0, 999]`, present on success.
    pub order_id: Option<u64>,
    pub simulated_latency: Duration,
}

/// Per-endpoint state machine for `POST /createOrder`.
pub struct OrderPipeline {
    tracer: Tracer,
    logger: Arc<DualSinkLogger>,
    counter: Arc<OutcomeCounter>,
    random: Arc<dyn RandomSource>,
    policy: FailurePolicy,
    latency: LatencyProfile,
}

impl OrderPipeline {
    pub fn new(instruments: &Instruments, random: Arc<dyn RandomSource>, policy: FailurePolicy) -> Self {
        Self {
            tracer: instruments.tracer.clone(),
            logger: instruments.logger.clone(),
            counter: instruments.orders_processed.clone(),
            random,
            policy,
            latency: LatencyProfile::default(),
        }
    }

    pub fn with_latency(mut self, latency: LatencyProfile) -> Self {
        self.latency = latency;
        self
    }

    /// Run one request. `ctx` carries the request's root span as its active span.
    pub async fn create_order(&self, ctx: &TraceContext) -> Result<OrderReport, PipelineError> {
        let mut run = OrderRun::new();

        run.advance(Stage::Validating)?;
        self.pause(&mut run, self.latency.validation).await;

        let path = self.policy.draw(self.random.as_ref());
        run.advance(Stage::Inserting)?;

        let result = match self.insert_order(ctx, &mut run, path == OrderPath::DbFailure).await {
            Ok(()) => {
                run.advance(Stage::Paying)?;
                self.process_payment(ctx, &mut run, path == OrderPath::PaymentFailure)
                    .await
            }
            Err(failure) => Err(failure),
        };

        let report = match result {
            Ok(()) => {
                run.advance(Stage::Terminal(OrderOutcome::Success))?;
                self.counter.add(ctx, 1, OrderOutcome::Success.outcome());

                let order_id = self.random.next_in(0..=ORDER_ID_MAX);
                self.logger.info(
                    ctx,
                    "Order created successfully",
                    &[KeyValue::int("order.id", order_id as i64)],
                );
                set_root_status(ctx, StatusCode::Ok, "order created successfully");
                OrderReport {
                    outcome: OrderOutcome::Success,
                    order_id: Some(order_id),
                    simulated_latency: run.simulated_latency(),
                }
            }
            Err(failure) => {
                run.advance(Stage::Terminal(failure.outcome))?;
                self.counter.add(ctx, 1, failure.outcome.outcome());
                set_root_status(ctx, StatusCode::Error, failure.message);
                OrderReport {
                    outcome: failure.outcome,
                    order_id: None,
                    simulated_latency: run.simulated_latency(),
                }
            }
        };

        tracing::debug!(
            trace_id = %ctx.trace_id(),
            outcome = ?report.outcome,
            simulated_ms = report.simulated_latency.as_millis() as u64,
            "createOrder finished"
        );
        Ok(report)
    }

    async fn insert_order(&self, ctx: &TraceContext, run: &mut OrderRun, fail: bool) -> Result<(), StageFailure> {
        let (db_ctx, span) = self.tracer.start_span(ctx, DB_SPAN);
        if fail {
            self.pause(run, self.latency.db_insert_failure).await;
            self.fail_stage(&db_ctx, &span, DB_FAILURE);
            return Err(DB_FAILURE);
        }
        self.pause(run, self.latency.db_insert).await;
        span.set_status(StatusCode::Ok, "order persisted");
        span.end();
        Ok(())
    }

    async fn process_payment(&self, ctx: &TraceContext, run: &mut OrderRun, fail: bool) -> Result<(), StageFailure> {
        let (payment_ctx, span) = self.tracer.start_span(ctx, PAYMENT_SPAN);
        if fail {
            self.fail_stage(&payment_ctx, &span, PAYMENT_FAILURE);
            return Err(PAYMENT_FAILURE);
        }
        self.pause(run, self.latency.payment).await;
        span.set_status(StatusCode::Ok, "payment captured");
        span.end();
        Ok(())
    }

    /// Record the failure on the stage span, log it there, then close the span.
    fn fail_stage(&self, stage_ctx: &TraceContext, span: &Span, failure: StageFailure) {
        span.record_error(failure.reason, failure.stage);
        span.set_status(StatusCode::Error, failure.message);
        self.logger.error(
            stage_ctx,
            failure.message,
            &[
                KeyValue::string("stage", failure.stage),
                KeyValue::string("error.reason", failure.reason),
            ],
        );
        span.end();
    }

    async fn pause(&self, run: &mut OrderRun, range: LatencyRange) {
        let latency = range.draw(self.random.as_ref());
        tokio::time::sleep(latency).await;
        run.add_latency(latency);
    }
}

fn set_root_status(ctx: &TraceContext, code: StatusCode, message: &str) {
    if let Some(root) = ctx.active_span() {
        root.set_status(code, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::export::InMemoryExporter;
    use crate::observability::sink::{MemoryConsole, MemorySink};
    use crate::observability::{Outcome, SpanId};
    use crate::pipeline::random::{ScriptedRandom, SeededRandom};

    struct Harness {
        instruments: Instruments,
        exporter: Arc<InMemoryExporter>,
        durable: Arc<MemorySink>,
    }

    fn harness() -> Harness {
        let exporter = Arc::new(InMemoryExporter::new());
        let durable = Arc::new(MemorySink::new());
        let instruments = Instruments {
            tracer: Tracer::new(exporter.clone()),
            logger: Arc::new(DualSinkLogger::new(durable.clone(), Arc::new(MemoryConsole::new()))),
            orders_processed: Arc::new(OutcomeCounter::orders_processed().unwrap()),
        };
        Harness {
            instruments,
            exporter,
            durable,
        }
    }

    async fn run_once(h: &Harness, pipeline: &OrderPipeline) -> (OrderReport, TraceContext, SpanId) {
        let (ctx, root) = h
            .instruments
            .tracer
            .start_span(&TraceContext::new_root(), "POST /createOrder");
        let report = pipeline.create_order(&ctx).await.unwrap();
        let root_id = root.id();
        root.end();
        (report, ctx, root_id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_db_failure() {
        let h = harness();
        // validation, bucket 0 (fail), coin 0 (database), insert latency
        let random = Arc::new(ScriptedRandom::new([0, 0, 0, 0]));
        let pipeline = OrderPipeline::new(&h.instruments, random, FailurePolicy::default());

        let (report, ctx, root_id) = run_once(&h, &pipeline).await;
        assert_eq!(report.outcome, OrderOutcome::DbFailure);
        assert_eq!(report.order_id, None);
        assert_eq!(h.instruments.orders_processed.get(Outcome::Failure), 1);
        assert_eq!(h.instruments.orders_processed.get(Outcome::Success), 0);

        let spans = h.exporter.spans_for(ctx.trace_id());
        assert_eq!(spans.len(), 2);
        let root = spans.iter().find(|s| s.span_id == root_id).unwrap();
        assert_eq!(root.status, StatusCode::Error);

        let db = spans.iter().find(|s| s.name == DB_SPAN).unwrap();
        assert_eq!(db.status, StatusCode::Error);
        assert_eq!(db.parent_span_id, Some(root_id));
        assert_eq!(db.error.as_ref().unwrap().message, "simulated database constraint violation");
        assert!(db.events.iter().all(|e| {
            e.attributes
                .iter()
                .all(|kv| kv.key != "log.level" || kv.value.to_string() == "ERROR")
        }));
        assert!(spans.iter().all(|s| s.name != PAYMENT_SPAN));

        let records = h.durable.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["level"], "ERROR");
        assert_eq!(records[0]["attributes"]["stage"], "database");
        assert_eq!(records[0]["span_id"], db.span_id.to_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_payment_failure() {
        let h = harness();
        let random = Arc::new(ScriptedRandom::new([0, 0, 1, 0]));
        let pipeline = OrderPipeline::new(&h.instruments, random, FailurePolicy::default());

        let (report, ctx, root_id) = run_once(&h, &pipeline).await;
        assert_eq!(report.outcome, OrderOutcome::PaymentFailure);

        let spans = h.exporter.spans_for(ctx.trace_id());
        assert_eq!(spans.len(), 3);
        let db = spans.iter().find(|s| s.name == DB_SPAN).unwrap();
        assert_eq!(db.status, StatusCode::Ok);
        let payment = spans.iter().find(|s| s.name == PAYMENT_SPAN).unwrap();
        assert_eq!(payment.status, StatusCode::Error);
        assert_eq!(payment.error.as_ref().unwrap().stage, "payment");
        let root = spans.iter().find(|s| s.span_id == root_id).unwrap();
        assert_eq!(root.status, StatusCode::Error);
        assert_eq!(h.durable.records()[0]["attributes"]["stage"], "payment");
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_path() {
        let h = harness();
        // validation, bucket 5 (success), insert, payment, order id 1234 → 1234 % 1000
        let random = Arc::new(ScriptedRandom::new([0, 5, 0, 0, 1234]));
        let pipeline = OrderPipeline::new(&h.instruments, random, FailurePolicy::default());

        let (report, ctx, root_id) = run_once(&h, &pipeline).await;
        assert_eq!(report.outcome, OrderOutcome::Success);
        assert_eq!(report.order_id, Some(234));
        assert_eq!(report.simulated_latency, Duration::from_millis(30 + 50 + 40));
        assert_eq!(h.instruments.orders_processed.get(Outcome::Success), 1);

        let spans = h.exporter.spans_for(ctx.trace_id());
        assert_eq!(spans.len(), 3);
        assert!(spans.iter().all(|s| s.status == StatusCode::Ok));
        let root = spans.iter().find(|s| s.span_id == root_id).unwrap();
        let log = root.events.iter().find(|e| e.name == "log").unwrap();
        assert!(log.attributes.iter().any(|kv| kv.key == "order.id"));

        let records = h.durable.records();
        assert_eq!(records[0]["message"], "Order created successfully");
        assert_eq!(records[0]["attributes"]["order.id"], 234);
        assert_eq!(records[0]["trace_id"], ctx.trace_id().to_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_totals_match_requests() {
        let h = harness();
        let pipeline = OrderPipeline::new(&h.instruments, Arc::new(SeededRandom::new(11)), FailurePolicy::default());
        let n = 500;
        let mut failures = 0;
        for _ in 0..n {
            let (report, ctx, _) = run_once(&h, &pipeline).await;
            let spans = h.exporter.spans_for(ctx.trace_id());
            let expected = match report.outcome {
                OrderOutcome::DbFailure => 2,
                _ => 3,
            };
            assert_eq!(spans.len(), expected);
            assert!(spans.iter().all(|s| s.status != StatusCode::Unset));
            if !report.outcome.is_success() {
                failures += 1;
            } else {
                assert!(report.order_id.unwrap() <= ORDER_ID_MAX);
            }
        }
        let counter = &h.instruments.orders_processed;
        assert_eq!(counter.total(), n);
        assert_eq!(counter.get(Outcome::Failure), failures);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_request_closes_stage_span() {
        let h = harness();
        let random = Arc::new(ScriptedRandom::new([0, 5, 99]));
        let pipeline = OrderPipeline::new(&h.instruments, random, FailurePolicy::default());
        let (ctx, root) = h
            .instruments
            .tracer
            .start_span(&TraceContext::new_root(), "POST /createOrder");

        let run = pipeline.create_order(&ctx);
        // Validation takes 30ms; the insert at least 50ms more.
        let result = tokio::time::timeout(Duration::from_millis(60), run).await;
        assert!(result.is_err());
        drop(root);

        let db = h.exporter.find(DB_SPAN).unwrap();
        assert_eq!(db.status, StatusCode::Error);
        assert_eq!(db.status_message, "cancelled");
        assert_eq!(h.instruments.orders_processed.total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_share_over_ten_thousand_orders() {
        let h = harness();
        let pipeline = OrderPipeline::new(&h.instruments, Arc::new(SeededRandom::new(2024)), FailurePolicy::default());

        for _ in 0..10_000 {
            let (ctx, root) = h
                .instruments
                .tracer
                .start_span(&TraceContext::new_root(), "POST /createOrder");
            pipeline.create_order(&ctx).await.unwrap();
            root.end();
        }

        let counter = &h.instruments.orders_processed;
        let success = counter.get(Outcome::Success);
        let failure = counter.get(Outcome::Failure);
        assert_eq!(success + failure, 10_000);
        assert_eq!(counter.total(), 10_000);
        let share = failure as f64 / 10_000.0;
        assert!((0.08..=0.12).contains(&share), "failure share {share}");
    }
}
