//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (request ID, root span, TraceContext extension)
//!     → handlers.rs (createOrder / checkInventory → pipeline)
//!     → response.rs (JSON encoding or generic 500)
//!     → Send to client
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use handlers::{InventoryResponse, OrderResponse};
pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
