//! Launching and stopping one supervised executable.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};

use crate::provision::{ProvisionError, ProvisionTask, Provisioner};
use crate::supervisor::output;
use crate::supervisor::state::FailureClass;

/// A file regenerated before every launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub path: PathBuf,
    pub contents: String,
}

/// Everything needed to (re)launch a process.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Name used in logs and metrics.
    pub name: String,
    pub binary: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: Option<PathBuf>,
    /// Files written before each launch.
    pub files: Vec<GeneratedFile>,
    /// Re-run before each launch; a no-op when the binary is already present.
    pub provision: Option<ProvisionTask>,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, binary: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            binary: binary.into(),
            args: Vec::new(),
            working_dir: None,
            files: Vec::new(),
            provision: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Error type for the launch path.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("failed to write {path:?}: {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to launch {binary:?}: {source}")]
    Launch {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SpawnError {
    pub fn class(&self) -> FailureClass {
        match self {
            SpawnError::Provision(_) => FailureClass::Provision,
            SpawnError::WriteFile { .. } | SpawnError::Launch { .. } => FailureClass::Spawn,
        }
    }
}

/// Provision, regenerate files, and spawn. Output pipes are handed to taps.
pub async fn launch(spec: &ProcessSpec, provisioner: &Provisioner) -> Result<Child, SpawnError> {
    if let Some(task) = &spec.provision {
        provisioner.provision(task).await?;
    }

    for file in &spec.files {
        tokio::fs::write(&file.path, &file.contents)
            .await
            .map_err(|source| SpawnError::WriteFile {
                path: file.path.clone(),
                source,
            })?;
    }

    let mut command = Command::new(&spec.binary);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.working_dir {
        command.current_dir(dir);
    }

    let mut child = command.spawn().map_err(|source| SpawnError::Launch {
        binary: spec.binary.clone(),
        source,
    })?;

    if let Some(stdout) = child.stdout.take() {
        output::tap(spec.name.clone(), "stdout", stdout);
    }
    if let Some(stderr) = child.stderr.take() {
        output::tap(spec.name.clone(), "stderr", stderr);
    }

    Ok(child)
}

/// Ask the child to exit, wait up to `grace`, then kill it.
pub async fn stop(name: &str, child: &mut Child, grace: Duration) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }

    request_termination(name, child);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::info!(process = name, status = %status, "Process exited after termination request");
        }
        Ok(Err(e)) => {
            tracing::warn!(process = name, error = %e, "Failed to await process exit");
        }
        Err(_) => {
            tracing::warn!(process = name, grace = ?grace, "Grace period elapsed, killing process");
            if let Err(e) = child.kill().await {
                tracing::error!(process = name, error = %e, "Failed to kill process");
            }
        }
    }
}

#[cfg(unix)]
fn request_termination(name: &str, child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        tracing::warn!(process = name, pid, error = %e, "Failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn request_termination(name: &str, child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::warn!(process = name, error = %e, "Failed to terminate process");
    }
}
