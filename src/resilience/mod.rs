//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Artifact download attempt fails:
//!     → backoff.rs linear_backoff (next attempt, same task)
//! Whole provisioning round fails at boot:
//!     → backoff.rs calculate_backoff (next round, exponential with jitter)
//! ```
//!
//! # Design Decisions
//! - Every external call has a deadline
//! - Relay connections are never retried; clients retry
//! - Process restarts use fixed delays owned by the supervisor policy

pub mod backoff;
