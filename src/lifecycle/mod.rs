//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → wait_for_shutdown returns
//!
//! Shutdown (shutdown.rs):
//!     trigger → HTTP server stops accepting → in-flight requests drain
//!     → span exporter flushes within the grace window → exit
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, flush telemetry
//! - Telemetry flush has a timeout: remaining spans are dropped after it

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_shutdown;
