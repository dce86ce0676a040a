//! Process supervisor tests using `/bin/sh` as a stand-in backend.

#![cfg(unix)]

use axum::http::StatusCode;
use std::path::Path;
use std::time::Duration;
use url::Url;

use backend_relay::lifecycle::Shutdown;
use backend_relay::provision::ProvisionTask;
use backend_relay::supervisor::{
    GeneratedFile, ProcessSpec, RestartPolicy, Supervisor, SupervisorState,
};

mod common;

fn fast_policy(max_restarts: u32) -> RestartPolicy {
    RestartPolicy {
        max_restarts,
        crash_delay: Duration::from_millis(20),
        launch_retry_delay: Duration::from_millis(10),
        startup_window: Duration::from_millis(200),
        stop_grace: Duration::from_secs(2),
    }
}

fn shell(name: &str, script: String) -> ProcessSpec {
    ProcessSpec::new(name, "/bin/sh").args(["-c".to_string(), script])
}

fn launches(log: &Path) -> usize {
    std::fs::read_to_string(log).map(|s| s.lines().count()).unwrap_or(0)
}

#[tokio::test]
async fn crash_loop_ends_in_failed_after_the_bound() {
    let dir = common::scratch_dir("supervisor-crash");
    let log = dir.join("launches.log");
    let spec = shell("crasher", format!("echo launched >> {}; exit 1", log.display()));

    let shutdown = Shutdown::new();
    let handle = tokio::time::timeout(
        Duration::from_secs(10),
        Supervisor::new(spec, fast_policy(5)).run(shutdown.subscribe()),
    )
    .await
    .expect("supervisor did not give up");

    assert_eq!(handle.state, SupervisorState::Failed);
    assert_eq!(handle.restarts, 5);
    assert_eq!(handle.last_exit.and_then(|e| e.code), Some(1));
    // Initial launch plus five restarts.
    assert_eq!(launches(&log), 6);
}

#[tokio::test]
async fn clean_exit_is_still_unexpected() {
    let dir = common::scratch_dir("supervisor-clean-exit");
    let log = dir.join("launches.log");
    let spec = shell("quitter", format!("echo launched >> {}; exit 0", log.display()));

    let shutdown = Shutdown::new();
    let handle = Supervisor::new(spec, fast_policy(1)).run(shutdown.subscribe()).await;

    assert_eq!(handle.state, SupervisorState::Failed);
    assert_eq!(handle.restarts, 1);
    assert_eq!(launches(&log), 2);
}

#[tokio::test]
async fn missing_executable_counts_against_the_bound() {
    let spec = ProcessSpec::new("ghost", "/nonexistent/backend-relay/xray");

    let shutdown = Shutdown::new();
    let handle = Supervisor::new(spec, fast_policy(2)).run(shutdown.subscribe()).await;

    assert_eq!(handle.state, SupervisorState::Failed);
    assert_eq!(handle.restarts, 2);
    assert!(handle.last_exit.is_none());
}

#[tokio::test]
async fn files_are_regenerated_before_every_launch() {
    let dir = common::scratch_dir("supervisor-files");
    let config = dir.join("config.json");
    let log = dir.join("launches.log");
    let mut spec = shell(
        "reader",
        format!(
            "cat {cfg} >> {log}; echo >> {log}; rm {cfg}; exit 2",
            cfg = config.display(),
            log = log.display()
        ),
    );
    spec.files.push(GeneratedFile {
        path: config.clone(),
        contents: "{\"generation\":1}".into(),
    });

    let shutdown = Shutdown::new();
    let handle = Supervisor::new(spec, fast_policy(2)).run(shutdown.subscribe()).await;

    assert_eq!(handle.state, SupervisorState::Failed);
    let contents = std::fs::read_to_string(&log).unwrap();
    assert_eq!(contents.matches("{\"generation\":1}").count(), 3);
}

#[tokio::test]
async fn stop_terminates_a_running_process() {
    let spec = shell("sleeper", "exec sleep 30".to_string());
    let shutdown = Shutdown::new();
    let supervisor = Supervisor::new(spec, fast_policy(5));
    let mut status = supervisor.subscribe();
    let task = tokio::spawn(supervisor.run(shutdown.subscribe()));

    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|h| h.state == SupervisorState::Running),
    )
    .await
    .expect("process never reached running")
    .unwrap();
    assert!(status.borrow().pid.is_some());

    shutdown.trigger();
    let handle = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("stop exceeded the grace period")
        .unwrap();

    assert_eq!(handle.state, SupervisorState::Stopped);
    assert_eq!(handle.restarts, 0);
    assert!(handle.pid.is_none());
}

#[tokio::test]
async fn stop_preempts_a_pending_restart() {
    let spec = shell("crasher", "exit 1".to_string());
    let mut policy = fast_policy(5);
    policy.crash_delay = Duration::from_secs(30);

    let shutdown = Shutdown::new();
    let supervisor = Supervisor::new(spec, policy);
    let mut status = supervisor.subscribe();
    let task = tokio::spawn(supervisor.run(shutdown.subscribe()));

    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|h| h.state == SupervisorState::Restarting),
    )
    .await
    .unwrap()
    .unwrap();

    shutdown.trigger();
    let handle = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    assert_eq!(handle.state, SupervisorState::Stopped);
    assert_eq!(handle.restarts, 1);
}

#[tokio::test]
async fn provisioned_binary_is_launched() {
    let dir = common::scratch_dir("supervisor-provision");
    let (source, _) = common::start_artifact_server(StatusCode::OK, b"#!/bin/sh\nexit 3\n").await;
    let binary = dir.join("backend");

    let mut spec = ProcessSpec::new("backend", &binary);
    spec.provision = Some(ProvisionTask {
        name: "backend".into(),
        sources: vec![Url::parse(&source).unwrap()],
        target: binary.clone(),
        max_attempts: 1,
        attempt_timeout: Duration::from_secs(2),
        backoff_step: Duration::from_millis(1),
    });

    let shutdown = Shutdown::new();
    let handle = Supervisor::new(spec, fast_policy(0)).run(shutdown.subscribe()).await;

    assert_eq!(handle.state, SupervisorState::Failed);
    assert_eq!(handle.last_exit.and_then(|e| e.code), Some(3));
    assert!(binary.exists());
}

#[tokio::test]
async fn garbage_output_does_not_kill_the_process() {
    let script = "printf '\\377\\376 bad bytes\\n'; sleep 0.3; \
                  i=0; while [ $i -lt 200 ]; do echo still-alive; i=$((i+1)); done; \
                  printf '\\377\\376 more\\n' >&2; exec sleep 30";
    let shutdown = Shutdown::new();
    let supervisor = Supervisor::new(shell("noisy", script.to_string()), fast_policy(0));
    let mut status = supervisor.subscribe();
    let task = tokio::spawn(supervisor.run(shutdown.subscribe()));

    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|h| h.state == SupervisorState::Running),
    )
    .await
    .unwrap()
    .unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(status.borrow().state, SupervisorState::Running);
    assert_eq!(status.borrow().restarts, 0);

    shutdown.trigger();
    let handle = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert_eq!(handle.state, SupervisorState::Stopped);
    assert_eq!(handle.restarts, 0);
}
