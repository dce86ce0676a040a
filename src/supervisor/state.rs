//! Backend lifecycle state machine.
//!
//! # States
//! - Idle: no process exists
//! - Starting: files written, executable launched, not yet observed alive
//! - Running: alive past the startup window
//! - Exited: process gone, restart decision pending
//! - Restarting: waiting out the restart delay
//! - Failed: restart bound exhausted (terminal)
//! - Stopped: explicit stop (terminal)
//!
//! # State Transitions
//! ```text
//! Idle ──Start──▶ Starting ──Launched──▶ Starting ──Alive──▶ Running
//! Starting/Running ──Exited / LaunchFailed──▶ Exited
//! Exited ──evaluate (restarts < bound)──▶ Restarting ──RestartDue──▶ Starting
//! Exited ──evaluate (restarts = bound)──▶ Failed
//! any non-terminal ──StopRequested──▶ Stopped
//! ```
//!
//! Transitions are pure; the event loop in `supervisor/mod.rs` performs the I/O
//! each [`Directive`] asks for.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::config::SupervisorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    Idle,
    Starting,
    Running,
    Exited,
    Restarting,
    Failed,
    Stopped,
}

impl SupervisorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SupervisorState::Failed | SupervisorState::Stopped)
    }

    /// Numeric encoding for the state gauge.
    pub fn code(&self) -> u8 {
        match self {
            SupervisorState::Idle => 0,
            SupervisorState::Starting => 1,
            SupervisorState::Running => 2,
            SupervisorState::Exited => 3,
            SupervisorState::Restarting => 4,
            SupervisorState::Failed => 5,
            SupervisorState::Stopped => 6,
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SupervisorState::Idle => "idle",
            SupervisorState::Starting => "starting",
            SupervisorState::Running => "running",
            SupervisorState::Exited => "exited",
            SupervisorState::Restarting => "restarting",
            SupervisorState::Failed => "failed",
            SupervisorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => f.write_str("unknown status"),
        }
    }
}

/// Why a process is no longer running; selects the restart delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The executable could not be provisioned.
    Provision,
    /// The executable could not be launched.
    Spawn,
    /// The process ran and then exited.
    Crash,
}

/// Restart bound and delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub crash_delay: Duration,
    pub launch_retry_delay: Duration,
    pub startup_window: Duration,
    pub stop_grace: Duration,
}

impl RestartPolicy {
    pub fn delay_for(&self, class: FailureClass) -> Duration {
        match class {
            FailureClass::Provision | FailureClass::Spawn => self.launch_retry_delay,
            FailureClass::Crash => self.crash_delay,
        }
    }
}

impl From<&SupervisorConfig> for RestartPolicy {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            max_restarts: config.max_restarts,
            crash_delay: Duration::from_secs(config.restart_delay_secs),
            launch_retry_delay: Duration::from_secs(config.launch_retry_delay_secs),
            startup_window: Duration::from_millis(config.startup_window_ms),
            stop_grace: Duration::from_secs(config.stop_grace_secs),
        }
    }
}

/// Discrete inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Start,
    Launched { pid: Option<u32> },
    LaunchFailed(FailureClass),
    Alive,
    Exited(ExitInfo),
    RestartDue,
    StopRequested,
}

/// What the event loop must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Provision, write files, spawn.
    Launch,
    /// Wait for the child to exit, become alive, or be stopped.
    Watch,
    /// Decide between restart and failure.
    Evaluate,
    /// Sleep, then deliver [`Event::RestartDue`].
    Restart(Duration),
    /// Leave the loop.
    Halt,
}

/// Lifecycle record of the supervised process. Owned by one supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendProcessHandle {
    pub pid: Option<u32>,
    pub state: SupervisorState,
    pub restarts: u32,
    pub last_exit: Option<ExitInfo>,
    #[serde(skip)]
    pending: Option<FailureClass>,
}

impl Default for BackendProcessHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendProcessHandle {
    pub fn new() -> Self {
        Self {
            pid: None,
            state: SupervisorState::Idle,
            restarts: 0,
            last_exit: None,
            pending: None,
        }
    }

    /// Apply an event. Events that make no sense in the current state are ignored
    /// and answered with the directive for the current state.
    pub fn apply(&mut self, event: Event) -> Directive {
        use SupervisorState::*;

        if self.state.is_terminal() {
            return Directive::Halt;
        }

        match (self.state, event) {
            (_, Event::StopRequested) => {
                self.state = Stopped;
                self.pid = None;
                Directive::Halt
            }
            (Idle, Event::Start) | (Restarting, Event::RestartDue) => {
                self.state = Starting;
                Directive::Launch
            }
            (Starting, Event::Launched { pid }) => {
                self.pid = pid;
                Directive::Watch
            }
            (Starting, Event::Alive) => {
                self.state = Running;
                Directive::Watch
            }
            (Starting, Event::LaunchFailed(class)) => {
                self.state = Exited;
                self.pid = None;
                self.pending = Some(class);
                Directive::Evaluate
            }
            (Starting | Running, Event::Exited(info)) => {
                self.state = Exited;
                self.pid = None;
                self.last_exit = Some(info);
                self.pending = Some(FailureClass::Crash);
                Directive::Evaluate
            }
            (state, _) => Self::resume(state),
        }
    }

    /// Decide what follows an exit.
    pub fn evaluate(&mut self, policy: &RestartPolicy) -> Directive {
        if self.state != SupervisorState::Exited {
            return Self::resume(self.state);
        }
        let class = self.pending.take().unwrap_or(FailureClass::Crash);

        if self.restarts >= policy.max_restarts {
            self.state = SupervisorState::Failed;
            return Directive::Halt;
        }

        self.restarts += 1;
        self.state = SupervisorState::Restarting;
        Directive::Restart(policy.delay_for(class))
    }

    fn resume(state: SupervisorState) -> Directive {
        match state {
            SupervisorState::Idle => Directive::Halt,
            SupervisorState::Starting | SupervisorState::Running => Directive::Watch,
            SupervisorState::Exited => Directive::Evaluate,
            // The delay was already served; deliver RestartDue next.
            SupervisorState::Restarting => Directive::Restart(Duration::ZERO),
            SupervisorState::Failed | SupervisorState::Stopped => Directive::Halt,
        }
    }
}
