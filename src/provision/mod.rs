//! Artifact provisioning subsystem.
//!
//! # Data Flow
//! ```text
//! ProvisionTask (ordered sources, target path, bounds)
//!     → target already present and non-empty? → done, no network
//!     → for each source, up to max_attempts:
//!         GET → stream into `<target>.part` → length checks
//!         → `.zip` source? extract the target's file name into `<target>.unpack`
//!         → rename over target → chmod +x → done
//!       on failure: remove `.part`/`.unpack`, sleep (linear backoff), next attempt
//!     → all sources exhausted → ProvisionError::Exhausted
//! ```
//!
//! # Design Decisions
//! - The target is only ever replaced by a rename, never written in place
//! - A directory at the target path is fatal and is not retried
//! - Backoff never decreases across the flattened attempt sequence
//! - Partial files are removed even when the provisioning future is dropped
//! - No synthesized fallback artifact exists

pub mod sources;

use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::time::{sleep, timeout};
use url::Url;

use crate::config::ProvisionConfig;
use crate::observability::metrics;
use crate::resilience::backoff::linear_backoff;

/// Failure of a single download attempt.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("source answered with an empty body")]
    EmptyBody,

    #[error("transfer truncated: expected {expected} bytes, received {received}")]
    Truncated { expected: u64, received: u64 },

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("unreadable archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("archive has no member named '{0}'")]
    MissingMember(String),
}

/// Error type for provisioning.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("provision task '{name}' is invalid: {reason}")]
    InvalidTask { name: String, reason: &'static str },

    #[error("invalid source '{url}': {source}")]
    InvalidSource {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("target {0:?} is a directory")]
    TargetIsDirectory(PathBuf),

    #[error("cannot install {path:?}: {source}")]
    Install {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{name}' unavailable after {attempts} attempts: {last}")]
    Exhausted {
        name: String,
        attempts: u32,
        #[source]
        last: FetchError,
    },
}

impl ProvisionError {
    /// Only source exhaustion can clear up on its own; everything else is structural.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProvisionError::Exhausted { .. })
    }
}

/// A single artifact to fetch.
#[derive(Debug, Clone)]
pub struct ProvisionTask {
    /// Artifact name for logs and metrics.
    pub name: String,
    /// Candidate sources, highest priority first.
    pub sources: Vec<Url>,
    /// Final location of the executable.
    pub target: PathBuf,
    /// Attempts per source.
    pub max_attempts: u32,
    /// Deadline for one attempt, connect to last byte.
    pub attempt_timeout: Duration,
    /// Linear backoff step between attempts.
    pub backoff_step: Duration,
}

impl ProvisionTask {
    /// Build a task from raw source strings and the shared download settings.
    pub fn new(
        name: impl Into<String>,
        sources: &[String],
        target: PathBuf,
        config: &ProvisionConfig,
    ) -> Result<Self, ProvisionError> {
        let sources = sources
            .iter()
            .map(|raw| {
                Url::parse(raw).map_err(|source| ProvisionError::InvalidSource {
                    url: raw.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: name.into(),
            sources,
            target,
            max_attempts: config.max_attempts,
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
            backoff_step: Duration::from_millis(config.backoff_base_ms),
        })
    }

    fn check(&self) -> Result<(), ProvisionError> {
        let reason = if self.sources.is_empty() {
            "no candidate sources"
        } else if self.max_attempts == 0 {
            "attempt bound is zero"
        } else {
            return Ok(());
        };
        Err(ProvisionError::InvalidTask {
            name: self.name.clone(),
            reason,
        })
    }

    fn file_name(&self) -> String {
        self.target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }

    fn part_path(&self) -> PathBuf {
        self.target.with_file_name(format!("{}.part", self.file_name()))
    }

    fn unpack_path(&self) -> PathBuf {
        self.target.with_file_name(format!("{}.unpack", self.file_name()))
    }
}

/// Whether a source serves a zip archive rather than the bare executable.
pub fn is_archive_source(url: &Url) -> bool {
    url.path().to_ascii_lowercase().ends_with(".zip")
}

/// Removes the listed files when dropped, so a cancelled download leaves nothing behind.
struct PartialFiles(Vec<PathBuf>);

impl Drop for PartialFiles {
    fn drop(&mut self) {
        for path in &self.0 {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::debug!(path = ?path, "Removed partial download"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = ?path, error = %e, "Failed to remove partial download"),
            }
        }
    }
}

/// Downloads artifacts over HTTP(S).
#[derive(Debug, Clone, Default)]
pub struct Provisioner {
    client: reqwest::Client,
}

impl Provisioner {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Produce an executable at `task.target`, or fail.
    pub async fn provision(&self, task: &ProvisionTask) -> Result<PathBuf, ProvisionError> {
        task.check()?;

        match tokio::fs::metadata(&task.target).await {
            Ok(meta) if meta.is_dir() => {
                return Err(ProvisionError::TargetIsDirectory(task.target.clone()));
            }
            Ok(meta) if meta.len() > 0 => {
                tracing::debug!(artifact = %task.name, path = ?task.target, "Artifact already present");
                install(&task.target).await?;
                return Ok(task.target.clone());
            }
            _ => {}
        }

        let part = task.part_path();
        let unpack = task.unpack_path();
        let _partials = PartialFiles(vec![part.clone(), unpack.clone()]);
        let mut attempts = 0u32;
        let mut last_error = None;

        for source in &task.sources {
            for attempt in 1..=task.max_attempts {
                if attempts > 0 {
                    sleep(linear_backoff(attempts, task.backoff_step, task.max_attempts)).await;
                }
                attempts += 1;

                let outcome = match timeout(task.attempt_timeout, self.fetch(source, &part)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(FetchError::Timeout(task.attempt_timeout)),
                };
                let outcome = match outcome {
                    Ok(_) if is_archive_source(source) => {
                        extract_member(&part, task.file_name(), &unpack).await
                    }
                    other => other,
                };
                let staged = if is_archive_source(source) { &unpack } else { &part };

                match outcome {
                    Ok(bytes) => {
                        tokio::fs::rename(staged, &task.target).await.map_err(|source| {
                            ProvisionError::Install {
                                path: task.target.clone(),
                                source,
                            }
                        })?;
                        install(&task.target).await?;
                        metrics::record_provision_attempt(&task.name, "success");
                        tracing::info!(
                            artifact = %task.name,
                            source = %source,
                            bytes,
                            path = ?task.target,
                            "Artifact provisioned"
                        );
                        return Ok(task.target.clone());
                    }
                    Err(e) => {
                        remove_partial(&part).await;
                        remove_partial(&unpack).await;
                        metrics::record_provision_attempt(&task.name, "failure");
                        tracing::warn!(
                            artifact = %task.name,
                            source = %source,
                            attempt,
                            error = %e,
                            "Download attempt failed"
                        );
                        last_error = Some(e);
                    }
                }
            }
        }

        match last_error {
            Some(last) => Err(ProvisionError::Exhausted {
                name: task.name.clone(),
                attempts,
                last,
            }),
            None => Err(ProvisionError::InvalidTask {
                name: task.name.clone(),
                reason: "no attempts were made",
            }),
        }
    }

    async fn fetch(&self, url: &Url, part: &Path) -> Result<u64, FetchError> {
        let response = self.client.get(url.clone()).send().await?.error_for_status()?;
        let expected = response.content_length();
        if expected == Some(0) {
            return Err(FetchError::EmptyBody);
        }

        let mut file = tokio::fs::File::create(part).await?;
        let mut body = response.bytes_stream();
        let mut received = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        if received == 0 {
            return Err(FetchError::EmptyBody);
        }
        if let Some(expected) = expected {
            if expected != received {
                return Err(FetchError::Truncated { expected, received });
            }
        }
        Ok(received)
    }
}

/// Copy one member of the downloaded archive at `archive` into `dest`.
async fn extract_member(archive: &Path, member: String, dest: &Path) -> Result<u64, FetchError> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    let extracted = tokio::task::spawn_blocking(move || -> Result<u64, FetchError> {
        let mut zip = zip::ZipArchive::new(std::fs::File::open(&archive)?)?;
        let mut entry = match zip.by_name(&member) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => return Err(FetchError::MissingMember(member)),
            Err(e) => return Err(e.into()),
        };
        let mut out = std::fs::File::create(&dest)?;
        let written = std::io::copy(&mut entry, &mut out)?;
        out.sync_all()?;
        Ok(written)
    })
    .await
    .map_err(|e| FetchError::Io(std::io::Error::other(e)))??;

    if extracted == 0 {
        return Err(FetchError::EmptyBody);
    }
    Ok(extracted)
}

async fn remove_partial(part: &Path) {
    match tokio::fs::remove_file(part).await {
        Ok(()) => tracing::debug!(path = ?part, "Removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = ?part, error = %e, "Failed to remove partial download"),
    }
}

/// Grant execute permission to the owner (and read/execute to everyone).
async fn install(path: &Path) -> Result<(), ProvisionError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let io_err = |source| ProvisionError::Install {
            path: path.to_path_buf(),
            source,
        };
        let mut perms = tokio::fs::metadata(path).await.map_err(io_err)?.permissions();
        perms.set_mode(perms.mode() | 0o755);
        tokio::fs::set_permissions(path, perms).await.map_err(io_err)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
