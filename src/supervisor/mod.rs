//! Process supervision subsystem.
//!
//! # Responsibilities
//! - Own the lifecycle of exactly one process instance
//! - Regenerate its files and re-provision its binary before every launch
//! - Restart it after unexpected exits, up to a bound
//! - Stop it gracefully on shutdown
//!
//! # Data Flow
//! ```text
//! Supervisor::run
//!     loop {
//!         Directive::Launch   → process::launch → Event::Launched | Event::LaunchFailed
//!         Directive::Watch    → child exit | startup window | shutdown
//!         Directive::Evaluate → BackendProcessHandle::evaluate
//!         Directive::Restart  → sleep(delay) | shutdown
//!         Directive::Halt     → return final handle
//!     }
//! ```
//!
//! # Design Decisions
//! - One task drives one state machine, so launches never race
//! - Shutdown is observed at every suspension point
//! - Snapshots of the handle are published on a `watch` channel

pub mod backend;
pub mod output;
pub mod process;
pub mod state;

use std::process::ExitStatus;
use tokio::process::Child;
use tokio::sync::{broadcast, watch};
use tokio::time::sleep;

use crate::observability::metrics;
use crate::provision::Provisioner;

pub use process::{GeneratedFile, ProcessSpec, SpawnError};
pub use state::{
    BackendProcessHandle, Directive, Event, ExitInfo, FailureClass, RestartPolicy, SupervisorState,
};

/// What woke the watch step.
enum Wake {
    Exit(std::io::Result<ExitStatus>),
    Alive,
    Stop,
}

/// Drives one [`ProcessSpec`] through its lifecycle.
pub struct Supervisor {
    spec: ProcessSpec,
    policy: RestartPolicy,
    provisioner: Provisioner,
    status: watch::Sender<BackendProcessHandle>,
}

impl Supervisor {
    pub fn new(spec: ProcessSpec, policy: RestartPolicy) -> Self {
        let (status, _) = watch::channel(BackendProcessHandle::new());
        Self {
            spec,
            policy,
            provisioner: Provisioner::new(),
            status,
        }
    }

    /// Share a download client with other supervisors.
    pub fn with_provisioner(mut self, provisioner: Provisioner) -> Self {
        self.provisioner = provisioner;
        self
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Observe lifecycle snapshots.
    pub fn subscribe(&self) -> watch::Receiver<BackendProcessHandle> {
        self.status.subscribe()
    }

    /// Run until the restart bound is exhausted or shutdown is signalled.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> BackendProcessHandle {
        let name = self.spec.name.clone();
        let mut handle = BackendProcessHandle::new();
        let mut child: Option<Child> = None;

        let mut directive = handle.apply(Event::Start);
        self.publish(&handle, SupervisorState::Idle);

        loop {
            let previous = handle.state;
            directive = match directive {
                Directive::Launch => {
                    let launched = tokio::select! {
                        result = process::launch(&self.spec, &self.provisioner) => Some(result),
                        _ = shutdown.recv() => None,
                    };
                    match launched {
                        Some(Ok(spawned)) => {
                            let pid = spawned.id();
                            tracing::info!(process = %name, pid = ?pid, "Process launched");
                            child = Some(spawned);
                            handle.apply(Event::Launched { pid })
                        }
                        Some(Err(e)) => {
                            tracing::error!(process = %name, error = %e, "Launch failed");
                            handle.apply(Event::LaunchFailed(e.class()))
                        }
                        None => handle.apply(Event::StopRequested),
                    }
                }

                Directive::Watch => {
                    let event = match child.as_mut() {
                        Some(running) => {
                            let starting = handle.state == SupervisorState::Starting;
                            let wake = tokio::select! {
                                status = running.wait() => Wake::Exit(status),
                                _ = sleep(self.policy.startup_window), if starting => Wake::Alive,
                                _ = shutdown.recv() => Wake::Stop,
                            };
                            match wake {
                                Wake::Alive => Event::Alive,
                                Wake::Exit(status) => {
                                    child = None;
                                    Event::Exited(exit_info(&name, status))
                                }
                                Wake::Stop => {
                                    process::stop(&name, running, self.policy.stop_grace).await;
                                    child = None;
                                    Event::StopRequested
                                }
                            }
                        }
                        None => Event::Exited(ExitInfo {
                            code: None,
                            signal: None,
                        }),
                    };
                    handle.apply(event)
                }

                Directive::Evaluate => {
                    let next = handle.evaluate(&self.policy);
                    match next {
                        Directive::Restart(delay) => {
                            metrics::record_restart(&name);
                            tracing::warn!(
                                process = %name,
                                restarts = handle.restarts,
                                limit = self.policy.max_restarts,
                                delay = ?delay,
                                last_exit = ?handle.last_exit,
                                "Restart scheduled"
                            );
                        }
                        Directive::Halt => {
                            tracing::error!(
                                process = %name,
                                restarts = handle.restarts,
                                last_exit = ?handle.last_exit,
                                "Restart limit reached, giving up"
                            );
                        }
                        _ => {}
                    }
                    next
                }

                Directive::Restart(delay) => {
                    let event = tokio::select! {
                        _ = sleep(delay) => Event::RestartDue,
                        _ = shutdown.recv() => Event::StopRequested,
                    };
                    handle.apply(event)
                }

                Directive::Halt => break,
            };

            self.publish(&handle, previous);
        }

        if let Some(mut running) = child.take() {
            process::stop(&name, &mut running, self.policy.stop_grace).await;
        }
        tracing::info!(process = %name, state = %handle.state, restarts = handle.restarts, "Supervisor finished");
        handle
    }

    fn publish(&self, handle: &BackendProcessHandle, previous: SupervisorState) {
        if handle.state != previous {
            tracing::debug!(
                process = %self.spec.name,
                from = %previous,
                to = %handle.state,
                "Supervisor state changed"
            );
        }
        metrics::record_supervisor_state(&self.spec.name, handle.state.code());
        self.status.send_replace(handle.clone());
    }
}

fn exit_info(name: &str, status: std::io::Result<ExitStatus>) -> ExitInfo {
    match status {
        Ok(status) => {
            let info = ExitInfo::from_status(status);
            tracing::warn!(process = name, exit = %info, "Process exited");
            info
        }
        Err(e) => {
            tracing::warn!(process = name, error = %e, "Failed to collect process exit status");
            ExitInfo {
                code: None,
                signal: None,
            }
        }
    }
}
