//! checkInventory pipeline: one simulated downstream lookup that always succeeds.

use std::sync::Arc;

use crate::observability::{DualSinkLogger, Instruments, KeyValue, StatusCode, TraceContext, Tracer};
use crate::pipeline::policy::LatencyRange;
use crate::pipeline::random::RandomSource;

pub const LOOKUP_SPAN: &str = "inventory.lookup";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryReport {
    pub delay_ms: u64,
}

pub struct InventoryCheck {
    tracer: Tracer,
    logger: Arc<DualSinkLogger>,
    random: Arc<dyn RandomSource>,
    lookup: LatencyRange,
}

impl InventoryCheck {
    pub fn new(instruments: &Instruments, random: Arc<dyn RandomSource>, lookup: LatencyRange) -> Self {
        Self {
            tracer: instruments.tracer.clone(),
            logger: instruments.logger.clone(),
            random,
            lookup,
        }
    }

    pub async fn check(&self, ctx: &TraceContext) -> InventoryReport {
        let delay_ms = self.lookup.draw_ms(self.random.as_ref());

        let (_lookup_ctx, span) = self.tracer.start_span(ctx, LOOKUP_SPAN);
        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        span.set_attribute(KeyValue::int("inventory.check.delay_ms", delay_ms as i64));
        span.set_status(StatusCode::Ok, "");
        span.end();

        self.logger.info(
            ctx,
            "Inventory checked successfully",
            &[KeyValue::int("inventory.check.delay_ms", delay_ms as i64)],
        );
        if let Some(root) = ctx.active_span() {
            root.set_status(StatusCode::Ok, "inventory checked");
        }
        InventoryReport { delay_ms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::export::InMemoryExporter;
    use crate::observability::sink::{MemoryConsole, MemorySink};
    use crate::observability::OutcomeCounter;
    use crate::pipeline::policy::LatencyProfile;
    use crate::pipeline::random::{ScriptedRandom, SeededRandom};

    fn instruments(exporter: Arc<InMemoryExporter>, durable: Arc<MemorySink>) -> Instruments {
        Instruments {
            tracer: Tracer::new(exporter),
            logger: Arc::new(DualSinkLogger::new(durable, Arc::new(MemoryConsole::new()))),
            orders_processed: Arc::new(OutcomeCounter::orders_processed().unwrap()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_reports_delay_in_range() {
        let exporter = Arc::new(InMemoryExporter::new());
        let durable = Arc::new(MemorySink::new());
        let instruments = instruments(exporter.clone(), durable.clone());
        let range = LatencyProfile::default().inventory_lookup;
        let check = InventoryCheck::new(&instruments, Arc::new(SeededRandom::new(3)), range);

        for _ in 0..50 {
            let (ctx, root) = instruments.tracer.start_span(&TraceContext::new_root(), "GET /checkInventory");
            let report = check.check(&ctx).await;
            assert!((200..=800).contains(&report.delay_ms));
            assert_eq!(root.status(), StatusCode::Ok);
            root.end();
        }
        assert_eq!(durable.records().len(), 50);
        assert_eq!(exporter.len(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_logs_delay_attribute() {
        let exporter = Arc::new(InMemoryExporter::new());
        let durable = Arc::new(MemorySink::new());
        let instruments = instruments(exporter.clone(), durable.clone());
        let check = InventoryCheck::new(
            &instruments,
            Arc::new(ScriptedRandom::new([123])),
            LatencyProfile::default().inventory_lookup,
        );

        let (ctx, root) = instruments.tracer.start_span(&TraceContext::new_root(), "GET /checkInventory");
        let report = check.check(&ctx).await;
        root.end();

        assert_eq!(report.delay_ms, 323);
        let record = &durable.records()[0];
        assert_eq!(record["message"], "Inventory checked successfully");
        assert_eq!(record["attributes"]["inventory.check.delay_ms"], 323);
        let lookup = exporter.find(LOOKUP_SPAN).unwrap();
        assert_eq!(lookup.parent_span_id, Some(root.id()));
    }
}
