//! Failure injection policy and simulated latency ranges.

use std::time::Duration;

use crate::config::PipelineConfig;
use crate::pipeline::random::RandomSource;

/// Inclusive millisecond range for a simulated wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl LatencyRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn draw_ms(&self, random: &dyn RandomSource) -> u64 {
        random.next_in(self.min_ms..=self.max_ms.max(self.min_ms))
    }

    pub fn draw(&self, random: &dyn RandomSource) -> Duration {
        Duration::from_millis(self.draw_ms(random))
    }

    pub fn contains(&self, ms: u64) -> bool {
        (self.min_ms..=self.max_ms).contains(&ms)
    }
}

/// Simulated latency of each stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyProfile {
    /// Request validation / business rules.
    pub validation: LatencyRange,
    /// Successful order insert.
    pub db_insert: LatencyRange,
    /// Insert that hits a constraint violation.
    pub db_insert_failure: LatencyRange,
    /// Successful payment call.
    pub payment: LatencyRange,
    /// Downstream inventory lookup.
    pub inventory_lookup: LatencyRange,
}

impl Default for LatencyProfile {
    fn default() -> Self {
        Self {
            validation: LatencyRange::new(30, 79),
            db_insert: LatencyRange::new(50, 149),
            db_insert_failure: LatencyRange::new(10, 49),
            payment: LatencyRange::new(40, 119),
            inventory_lookup: LatencyRange::new(200, 800),
        }
    }
}

/// Branch taken by a createOrder request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderPath {
    Success,
    DbFailure,
    PaymentFailure,
}

/// `failure_buckets` out of `total_buckets` take the failure path; a fair
/// coin then picks between the database and the payment failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    pub failure_buckets: u64,
    pub total_buckets: u64,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            failure_buckets: 1,
            total_buckets: 10,
        }
    }
}

impl From<&PipelineConfig> for FailurePolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            failure_buckets: config.failure_buckets,
            total_buckets: config.total_buckets,
        }
    }
}

impl FailurePolicy {
    /// Never fails. Useful for exercising the success path.
    pub const fn never() -> Self {
        Self {
            failure_buckets: 0,
            total_buckets: 1,
        }
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total_buckets == 0 {
            return 0.0;
        }
        self.failure_buckets.min(self.total_buckets) as f64 / self.total_buckets as f64
    }

    /// Draw the branch for one request.
    pub fn draw(&self, random: &dyn RandomSource) -> OrderPath {
        let total = self.total_buckets.max(1);
        let bucket = random.next_in(0..=total - 1);
        if bucket >= self.failure_buckets {
            return OrderPath::Success;
        }
        if random.next_in(0..=1) == 0 {
            OrderPath::DbFailure
        } else {
            OrderPath::PaymentFailure
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::random::{ScriptedRandom, SeededRandom};

    #[test]
    fn test_failure_rate_within_tolerance() {
        let policy = FailurePolicy::default();
        let random = SeededRandom::new(0x5eed);
        let n = 10_000;
        let mut db = 0;
        let mut payment = 0;
        for _ in 0..n {
            match policy.draw(&random) {
                OrderPath::Success => {}
                OrderPath::DbFailure => db += 1,
                OrderPath::PaymentFailure => payment += 1,
            }
        }
        let rate = (db + payment) as f64 / n as f64;
        assert!((0.08..=0.12).contains(&rate), "observed failure rate {rate}");
        // Roughly half of the failures are database failures.
        let share = db as f64 / (db + payment) as f64;
        assert!((0.35..=0.65).contains(&share), "observed db share {share}");
    }

    #[test]
    fn test_draw_branches() {
        let policy = FailurePolicy::default();
        assert_eq!(policy.draw(&ScriptedRandom::new([0, 0])), OrderPath::DbFailure);
        assert_eq!(policy.draw(&ScriptedRandom::new([0, 1])), OrderPath::PaymentFailure);
        for bucket in 1..10 {
            assert_eq!(policy.draw(&ScriptedRandom::new([bucket])), OrderPath::Success);
        }
    }

    #[test]
    fn test_never_policy() {
        let policy = FailurePolicy::never();
        let random = SeededRandom::new(1);
        assert_eq!(policy.failure_rate(), 0.0);
        for _ in 0..1000 {
            assert_eq!(policy.draw(&random), OrderPath::Success);
        }
    }

    #[test]
    fn test_latency_draws_respect_bounds() {
        let profile = LatencyProfile::default();
        let random = SeededRandom::new(9);
        for _ in 0..1000 {
            assert!(profile.validation.contains(profile.validation.draw_ms(&random)));
            assert!(profile.inventory_lookup.contains(profile.inventory_lookup.draw_ms(&random)));
        }
        assert_eq!(profile.validation.draw_ms(&ScriptedRandom::new([49])), 79);
    }
}
