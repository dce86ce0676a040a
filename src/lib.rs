//! Public relay in front of a supervised local backend process.
//!
//! One listener serves a status page, a health check, and a subscription
//! descriptor, and relays everything on the relay path into a backend
//! executable that this crate downloads, launches, and restarts.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod relay;

// Backend process management
pub mod provision;
pub mod supervisor;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::ServiceConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
