//! Startup orchestration.
//!
//! # Responsibilities
//! - Bind the public listener and serve status routes immediately
//! - Provision every required artifact, retrying whole rounds with backoff
//! - Start one supervisor per process
//! - On shutdown: stop accepting, stop processes, drain bridges
//!
//! # Design Decisions
//! - The listener binds before provisioning; relay requests fail fast until
//!   the backend is up, status routes never wait
//! - Boot provisioning exhaustion is fatal; later provisioning failures are
//!   handled by the supervisor's restart policy

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::ServiceConfig;
use crate::http::HttpServer;
use crate::lifecycle::{signals, Shutdown};
use crate::net::BridgeTracker;
use crate::observability::metrics;
use crate::provision::{ProvisionError, ProvisionTask, Provisioner};
use crate::resilience::backoff::calculate_backoff;
use crate::supervisor::{backend, BackendProcessHandle, RestartPolicy, Supervisor};

/// Upper bound on the delay between boot provisioning rounds.
const MAX_BOOT_BACKOFF_MS: u64 = 60_000;

/// Error type for the boot sequence.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("boot provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error("HTTP server failed: {0}")]
    Server(#[source] std::io::Error),
}

/// Run the relay until a termination signal arrives.
pub async fn run(config: ServiceConfig) -> Result<(), StartupError> {
    let config = Arc::new(config);

    if let Some(address) = &config.observability.metrics_address {
        match address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(metrics_address = %address, error = %e, "Failed to parse metrics address"),
        }
    }

    let address = config.listener.socket_address();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| StartupError::Bind { address, source })?;
    if let Ok(local) = listener.local_addr() {
        tracing::info!(address = %local, "Listener bound");
    }

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        let signal = signals::wait_for_termination().await;
        tracing::info!(signal, "Shutdown signal received");
        trigger.trigger();
    });

    serve(config, listener, shutdown).await
}

/// Serve on `listener`, provision, supervise, and wind down once `shutdown` fires.
pub async fn serve(
    config: Arc<ServiceConfig>,
    listener: TcpListener,
    shutdown: Shutdown,
) -> Result<(), StartupError> {
    let mut stop = shutdown.subscribe();

    let policy = RestartPolicy::from(&config.supervisor);
    let provisioner = Provisioner::new();
    let mut specs = vec![backend::backend_process(&config)?];
    specs.extend(backend::tunnel_process(&config)?);

    let supervisors: Vec<Supervisor> = specs
        .iter()
        .cloned()
        .map(|spec| Supervisor::new(spec, policy).with_provisioner(provisioner.clone()))
        .collect();
    let supervisor_shutdowns: Vec<_> = supervisors.iter().map(|_| shutdown.subscribe()).collect();

    let bridges = BridgeTracker::new();
    let mut server = HttpServer::new(Arc::clone(&config), bridges.clone());
    if let Some(first) = supervisors.first() {
        server = server.with_backend_status(first.subscribe());
    }
    let mut server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    let tasks: Vec<&ProvisionTask> = specs.iter().filter_map(|s| s.provision.as_ref()).collect();
    let boot = provision_all(&provisioner, &tasks, config.provision.boot_rounds, config.provision.backoff_base_ms);

    let booted = tokio::select! {
        result = boot => Some(result),
        _ = stop.recv() => None,
    };
    match booted {
        Some(Ok(())) => {}
        Some(Err(e)) => {
            tracing::error!(error = %e, "Boot provisioning exhausted");
            shutdown.trigger();
            finish_server(&mut server_task, &config).await;
            return Err(e.into());
        }
        None => {
            tracing::info!("Shutdown requested during boot provisioning");
            finish_server(&mut server_task, &config).await;
            return Ok(());
        }
    }

    let running: Vec<JoinHandle<BackendProcessHandle>> = supervisors
        .into_iter()
        .zip(supervisor_shutdowns)
        .map(|(supervisor, rx)| tokio::spawn(supervisor.run(rx)))
        .collect();

    let server_result = tokio::select! {
        result = &mut server_task => Some(result),
        _ = stop.recv() => None,
    };
    if let Some(result) = server_result {
        // The server only returns on its own when it fails.
        shutdown.trigger();
        for handle in running {
            let _ = handle.await;
        }
        return match result {
            Ok(Err(e)) => Err(StartupError::Server(e)),
            _ => Ok(()),
        };
    }

    tracing::info!("Shutting down");
    for handle in running {
        match handle.await {
            Ok(final_state) => tracing::info!(
                state = %final_state.state,
                restarts = final_state.restarts,
                "Supervisor stopped"
            ),
            Err(e) => tracing::error!(error = %e, "Supervisor task failed"),
        }
    }

    finish_server(&mut server_task, &config).await;

    let remaining = bridges.wait_for_drain(config.timeouts.drain()).await;
    if remaining > 0 {
        tracing::warn!(remaining, "Closing bridges that did not drain in time");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Give the server the drain timeout to finish in-flight requests.
async fn finish_server(
    server_task: &mut JoinHandle<Result<(), std::io::Error>>,
    config: &ServiceConfig,
) {
    match tokio::time::timeout(config.timeouts.drain(), &mut *server_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "HTTP server error"),
        Ok(Err(e)) => tracing::error!(error = %e, "HTTP server task failed"),
        Err(_) => {
            tracing::warn!("In-flight requests did not finish in time");
            server_task.abort();
        }
    }
}

/// Provision each task, retrying whole rounds with exponential backoff.
pub async fn provision_all(
    provisioner: &Provisioner,
    tasks: &[&ProvisionTask],
    rounds: u32,
    base_ms: u64,
) -> Result<(), ProvisionError> {
    for task in tasks {
        provision_at_boot(provisioner, task, rounds, base_ms).await?;
    }
    Ok(())
}

async fn provision_at_boot(
    provisioner: &Provisioner,
    task: &ProvisionTask,
    rounds: u32,
    base_ms: u64,
) -> Result<PathBuf, ProvisionError> {
    let rounds = rounds.max(1);
    let mut round = 1;
    loop {
        match provisioner.provision(task).await {
            Ok(path) => return Ok(path),
            Err(e) if e.is_retryable() && round < rounds => {
                let delay = calculate_backoff(round, base_ms, MAX_BOOT_BACKOFF_MS);
                tracing::warn!(
                    artifact = %task.name,
                    round,
                    rounds,
                    delay = ?delay,
                    error = %e,
                    "Provisioning round failed, retrying"
                );
                tokio::time::sleep(delay).await;
                round += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
