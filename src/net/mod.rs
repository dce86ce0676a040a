//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Upgraded client connection
//!     → connection.rs (id, BridgeGuard registered in the BridgeTracker)
//!     → relay bridge runs detached from the HTTP server
//!     → guard dropped when either side closes
//! ```
//!
//! # Design Decisions
//! - Each bridge tracked for graceful shutdown
//! - Drain waits are bounded; stragglers are dropped at exit

pub mod connection;

pub use connection::{BridgeGuard, BridgeTracker, ConnectionId};
