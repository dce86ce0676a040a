//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! environment variables / flags
//!     → loader.rs (clap Args → ServiceConfig)
//!     → validation.rs (semantic checks)
//!     → ServiceConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no reload
//! - All fields have defaults to allow an empty environment
//! - Validation separates syntactic (clap) from semantic checks
//! - A validation failure is fatal before any listener binds

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load, Args, ConfigError};
pub use schema::{
    BackendSettings, ListenerConfig, LogLevel, ProvisionConfig, PublicEndpoint, ServiceConfig,
    SupervisorConfig, TimeoutConfig, TransportStyle, TunnelSettings,
};
pub use validation::{validate_config, ValidationError, HEALTH_ROUTE};
