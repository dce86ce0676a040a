//! Integration tests for artifact provisioning against local HTTP sources.

use axum::http::StatusCode;
use std::sync::atomic::Ordering;
use std::time::Duration;
use url::Url;

use backend_relay::lifecycle::startup::provision_all;
use backend_relay::provision::{FetchError, ProvisionError, ProvisionTask, Provisioner};

mod common;

fn task(sources: &[String], target: std::path::PathBuf, attempts: u32) -> ProvisionTask {
    ProvisionTask {
        name: "xray".into(),
        sources: sources.iter().map(|s| Url::parse(s).unwrap()).collect(),
        target,
        max_attempts: attempts,
        attempt_timeout: Duration::from_secs(2),
        backoff_step: Duration::from_millis(5),
    }
}

#[tokio::test]
async fn downloads_and_marks_executable() {
    let dir = common::scratch_dir("provision-ok");
    let (source, hits) = common::start_artifact_server(StatusCode::OK, b"\x7fELF-binary").await;
    let target = dir.join("xray");

    let path = Provisioner::new()
        .provision(&task(&[source], target.clone(), 3))
        .await
        .unwrap();

    assert_eq!(path, target);
    assert_eq!(std::fs::read(&target).unwrap(), b"\x7fELF-binary");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(!dir.join("xray.part").exists());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o100, 0o100);
    }
}

#[tokio::test]
async fn existing_artifact_skips_the_network() {
    let dir = common::scratch_dir("provision-idempotent");
    let (source, hits) = common::start_artifact_server(StatusCode::OK, b"fresh").await;
    let target = dir.join("xray");
    std::fs::write(&target, b"already here").unwrap();

    let provisioner = Provisioner::new();
    for _ in 0..3 {
        provisioner
            .provision(&task(&[source.clone()], target.clone(), 3))
            .await
            .unwrap();
    }

    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(std::fs::read(&target).unwrap(), b"already here");
}

#[tokio::test]
async fn exhausts_exactly_sources_times_attempts() {
    let dir = common::scratch_dir("provision-exhaust");
    let (first, first_hits) = common::start_artifact_server(StatusCode::INTERNAL_SERVER_ERROR, b"").await;
    let (second, second_hits) = common::start_artifact_server(StatusCode::NOT_FOUND, b"").await;
    let target = dir.join("xray");

    let err = Provisioner::new()
        .provision(&task(&[first, second], target.clone(), 3))
        .await
        .unwrap_err();

    match err {
        ProvisionError::Exhausted { attempts, .. } => assert_eq!(attempts, 6),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(first_hits.load(Ordering::SeqCst), 3);
    assert_eq!(second_hits.load(Ordering::SeqCst), 3);
    assert!(!target.exists());
    assert!(!dir.join("xray.part").exists());
}

#[tokio::test]
async fn unreachable_sources_are_counted_too() {
    let dir = common::scratch_dir("provision-unreachable");
    let sources = vec![
        format!("http://127.0.0.1:{}/a", common::free_port().await),
        format!("http://127.0.0.1:{}/b", common::free_port().await),
    ];

    let err = Provisioner::new()
        .provision(&task(&sources, dir.join("xray"), 2))
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::Exhausted { attempts: 4, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn empty_body_is_a_failure() {
    let dir = common::scratch_dir("provision-empty");
    let (source, hits) = common::start_artifact_server(StatusCode::OK, b"").await;

    let err = Provisioner::new()
        .provision(&task(&[source], dir.join("xray"), 2))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProvisionError::Exhausted {
            last: FetchError::EmptyBody,
            ..
        }
    ));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert!(!dir.join("xray").exists());
    assert!(!dir.join("xray.part").exists());
}

#[tokio::test]
async fn falls_back_to_the_next_source() {
    let dir = common::scratch_dir("provision-fallback");
    let (broken, broken_hits) = common::start_artifact_server(StatusCode::BAD_GATEWAY, b"").await;
    let (good, good_hits) = common::start_artifact_server(StatusCode::OK, b"payload").await;

    Provisioner::new()
        .provision(&task(&[broken, good], dir.join("xray"), 2))
        .await
        .unwrap();

    assert_eq!(broken_hits.load(Ordering::SeqCst), 2);
    assert_eq!(good_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn directory_target_is_fatal_and_not_retried() {
    let dir = common::scratch_dir("provision-dir");
    let (source, hits) = common::start_artifact_server(StatusCode::OK, b"payload").await;
    let target = dir.join("xray");
    std::fs::create_dir_all(&target).unwrap();

    let err = Provisioner::new()
        .provision(&task(&[source], target, 3))
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::TargetIsDirectory(_)));
    assert!(!err.is_retryable());
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn boot_rounds_repeat_the_whole_task() {
    let dir = common::scratch_dir("provision-boot");
    let (source, hits) = common::start_artifact_server(StatusCode::SERVICE_UNAVAILABLE, b"").await;
    let task = task(&[source], dir.join("xray"), 2);

    let err = provision_all(&Provisioner::new(), &[&task], 2, 1).await.unwrap_err();
    assert!(matches!(err, ProvisionError::Exhausted { .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn release_archive_is_unpacked_into_place() {
    let dir = common::scratch_dir("provision-archive");
    let archive = common::zip_archive(&[
        ("README.md", b"release notes"),
        ("xray", b"\x7fELF-from-zip"),
        ("geoip.dat", b"data"),
    ]);
    let (source, hits) = common::start_archive_server(archive).await;
    let target = dir.join("xray");

    Provisioner::new()
        .provision(&task(&[source], target.clone(), 2))
        .await
        .unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), b"\x7fELF-from-zip");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(!dir.join("xray.part").exists());
    assert!(!dir.join("xray.unpack").exists());
}

#[tokio::test]
async fn archive_without_the_executable_falls_back() {
    let dir = common::scratch_dir("provision-archive-missing");
    let (archive, archive_hits) =
        common::start_archive_server(common::zip_archive(&[("README.md", b"notes")])).await;
    let (raw, raw_hits) = common::start_artifact_server(StatusCode::OK, b"raw-binary").await;
    let target = dir.join("xray");

    Provisioner::new()
        .provision(&task(&[archive, raw], target.clone(), 2))
        .await
        .unwrap();

    assert_eq!(archive_hits.load(Ordering::SeqCst), 2);
    assert_eq!(raw_hits.load(Ordering::SeqCst), 1);
    assert_eq!(std::fs::read(&target).unwrap(), b"raw-binary");
    assert!(!dir.join("xray.unpack").exists());
}

#[tokio::test]
async fn cancelled_download_leaves_no_partial_file() {
    let dir = common::scratch_dir("provision-cancel");
    let source = common::start_stalling_server().await;
    let mut slow = task(&[source], dir.join("xray"), 1);
    slow.attempt_timeout = Duration::from_secs(30);
    let part = dir.join("xray.part");

    let provisioner = Provisioner::new();
    let mut download = Box::pin(provisioner.provision(&slow));
    let part_created = async {
        while !part.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::select! {
        result = &mut download => panic!("download finished unexpectedly: {result:?}"),
        _ = tokio::time::timeout(Duration::from_secs(5), part_created) => {}
    }
    assert!(part.exists());

    drop(download);
    assert!(!part.exists());
    assert!(!dir.join("xray").exists());
}
