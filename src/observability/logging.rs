//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once, at process entry
//! - Honour `RUST_LOG` when present, otherwise the configured level
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - Backend process output is re-emitted through the same subscriber

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogLevel;

/// Filter directives for a level, applied to this crate and the HTTP stack.
pub fn default_directives(level: LogLevel) -> String {
    format!("backend_relay={level},tower_http={level},warn", level = level)
}

/// Install the global subscriber. Safe to call more than once; later calls are ignored.
pub fn init(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
