//! backend-relay
//!
//! ```text
//!                  ┌──────────────────────────────────────────────┐
//!                  │                 BACKEND RELAY                │
//!   Client         │  ┌────────┐   ┌──────────┐                   │
//!   ──────────────▶│  │  http  │──▶│  status  │  /, /health, /sub │
//!                  │  │ server │   └──────────┘                   │
//!                  │  │        │   ┌──────────┐   ┌────────────┐  │
//!                  │  │        │──▶│  relay   │──▶│  backend   │  │
//!                  │  └────────┘   └──────────┘   │  process   │  │
//!                  │                              └─────▲──────┘  │
//!                  │  ┌───────────┐   ┌────────────┐    │         │
//!                  │  │ provision │──▶│ supervisor │────┘         │
//!                  │  └───────────┘   └────────────┘              │
//!                  └──────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::process::ExitCode;

use backend_relay::config::{self, Args};
use backend_relay::lifecycle::startup;
use backend_relay::observability::logging;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.log_level);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "backend-relay starting");

    let config = match config::load(args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        listen = %config.listener.socket_address(),
        domain = %config.advertised_domain(),
        transport = %config.backend.transport,
        relay_path = %config.backend.relay_path,
        backend_port = config.backend.local_port,
        work_dir = ?config.work_dir,
        tunnel = config.tunnel.is_some(),
        "Configuration loaded"
    );

    match startup::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Fatal startup error");
            ExitCode::FAILURE
        }
    }
}
