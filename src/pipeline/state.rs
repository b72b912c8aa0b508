//! createOrder state machine.
//!
//! # States
//! ```text
//! Start → Validating → Inserting ─┬→ Terminal(DbFailure)
//!                                 └→ Paying ─┬→ Terminal(Success)
//!                                            └→ Terminal(PaymentFailure)
//! ```
//!
//! Once terminal, no further transitions are accepted.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::observability::Outcome;

/// Terminal result of one createOrder request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderOutcome {
    Success,
    DbFailure,
    PaymentFailure,
}

impl OrderOutcome {
    /// Counter label category.
    pub fn outcome(self) -> Outcome {
        match self {
            OrderOutcome::Success => Outcome::Success,
            OrderOutcome::DbFailure | OrderOutcome::PaymentFailure => Outcome::Failure,
        }
    }

    pub fn is_success(self) -> bool {
        self == OrderOutcome::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Validating,
    Inserting,
    Paying,
    Terminal(OrderOutcome),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Start => f.write_str("start"),
            Stage::Validating => f.write_str("validating"),
            Stage::Inserting => f.write_str("inserting"),
            Stage::Paying => f.write_str("paying"),
            Stage::Terminal(outcome) => write!(f, "terminal({:?})", outcome),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("invalid stage transition from {from} to {to}")]
    InvalidTransition { from: Stage, to: Stage },
}

/// Per-request pipeline state.
#[derive(Debug, Clone)]
pub struct OrderRun {
    stage: Stage,
    simulated_latency: Duration,
}

impl Default for OrderRun {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderRun {
    pub fn new() -> Self {
        Self {
            stage: Stage::Start,
            simulated_latency: Duration::ZERO,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn simulated_latency(&self) -> Duration {
        self.simulated_latency
    }

    pub fn outcome(&self) -> Option<OrderOutcome> {
        match self.stage {
            Stage::Terminal(outcome) => Some(outcome),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome().is_some()
    }

    pub fn add_latency(&mut self, latency: Duration) {
        self.simulated_latency += latency;
    }

    /// Move to `to`, rejecting anything outside the transition table.
    pub fn advance(&mut self, to: Stage) -> Result<(), PipelineError> {
        let allowed = matches!(
            (self.stage, to),
            (Stage::Start, Stage::Validating)
                | (Stage::Validating, Stage::Inserting)
                | (Stage::Inserting, Stage::Paying)
                | (Stage::Inserting, Stage::Terminal(OrderOutcome::DbFailure))
                | (Stage::Paying, Stage::Terminal(OrderOutcome::Success))
                | (Stage::Paying, Stage::Terminal(OrderOutcome::PaymentFailure))
        );
        if !allowed {
            return Err(PipelineError::InvalidTransition { from: self.stage, to });
        }
        self.stage = to;
        Ok(())
    }
}
