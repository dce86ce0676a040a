//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → "/", "/health", "/{sub}" → status.rs (never touches the backend)
//!     → anything else           → relay (classify, forward or 404)
//! ```

pub mod descriptor;
pub mod server;
pub mod status;

pub use server::{AppState, HttpServer};
