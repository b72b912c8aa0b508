//! Request pipelines.
//!
//! # Data Flow
//! ```text
//! POST /createOrder
//!     → order.rs: validate (sleep) → policy.rs draw
//!         → db.insert_order span → payment.process span
//!         → state.rs Terminal(Success | DbFailure | PaymentFailure)
//!         → OutcomeCounter + root span status
//!
//! GET /checkInventory
//!     → inventory.rs: inventory.lookup span (sleep) → log → done
//! ```
//!
//! # Design Decisions
//! - All randomness comes from an injected `RandomSource` (seedable)
//! - Simulated failures are terminal and reported once; nothing retries
//! - Stage sleeps are cancellable: dropping the request future closes the
//!   open stage span as `Error("cancelled")`

pub mod inventory;
pub mod order;
pub mod policy;
pub mod random;
pub mod state;

pub use inventory::{InventoryCheck, InventoryReport};
pub use order::{OrderPipeline, OrderReport};
pub use policy::{FailurePolicy, LatencyProfile, LatencyRange, OrderPath};
pub use random::{RandomSource, ScriptedRandom, SeededRandom, ThreadRandom};
pub use state::{OrderOutcome, OrderRun, PipelineError, Stage};
