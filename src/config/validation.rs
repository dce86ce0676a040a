//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (clap/serde handle syntactic)
//! - Identity token must be a canonical hyphenated UUID
//! - Routes must not collide with each other
//! - Download sources must be http(s) URLs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before any listener binds

use std::path::PathBuf;
use thiserror::Error;
use url::Url;

use crate::config::schema::ServiceConfig;

/// Route served by the health handler.
pub const HEALTH_ROUTE: &str = "/health";

/// A single semantic configuration violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("identity token '{0}' is not a canonical UUID (8-4-4-4-12 hex digits)")]
    InvalidIdentity(String),

    #[error("subscription path '{0}' must be a single non-empty segment of [A-Za-z0-9._~-]")]
    InvalidSubPath(String),

    #[error("relay path '{0}' must start with '/' and name a route other than '/'")]
    InvalidRelayPath(String),

    #[error("relay path '{relay}' collides with route '{route}'")]
    RouteCollision { relay: String, route: String },

    #[error("{field} must be non-zero")]
    ZeroPort { field: &'static str },

    #[error("backend port {0} is the same as the public listen port")]
    PortClash(u16),

    #[error("working directory {0:?} exists and is not a directory")]
    WorkDirNotDirectory(PathBuf),

    #[error("invalid download source '{url}': {reason}")]
    InvalidSource { url: String, reason: String },

    #[error("{field} must be at least 1")]
    ZeroBound { field: &'static str },
}

/// Validate a resolved configuration.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !is_canonical_uuid(&config.identity) {
        errors.push(ValidationError::InvalidIdentity(config.identity.clone()));
    }

    if !is_path_segment(&config.sub_path) {
        errors.push(ValidationError::InvalidSubPath(config.sub_path.clone()));
    }

    let relay = config.backend.relay_path.as_str();
    if !relay.starts_with('/') || relay.trim_end_matches('/').is_empty() {
        errors.push(ValidationError::InvalidRelayPath(relay.to_string()));
    } else {
        for route in [HEALTH_ROUTE.to_string(), config.sub_route()] {
            if relay.trim_end_matches('/') == route {
                errors.push(ValidationError::RouteCollision {
                    relay: relay.to_string(),
                    route,
                });
            }
        }
    }

    if config.listener.port == 0 {
        errors.push(ValidationError::ZeroPort { field: "listen port" });
    }
    if config.backend.local_port == 0 {
        errors.push(ValidationError::ZeroPort { field: "backend port" });
    }
    if config.public.port == 0 {
        errors.push(ValidationError::ZeroPort { field: "public port" });
    }
    if config.backend.local_port != 0 && config.backend.local_port == config.listener.port {
        errors.push(ValidationError::PortClash(config.backend.local_port));
    }

    if config.work_dir.exists() && !config.work_dir.is_dir() {
        errors.push(ValidationError::WorkDirNotDirectory(config.work_dir.clone()));
    }

    for url in config
        .provision
        .backend_urls
        .iter()
        .chain(config.provision.tunnel_urls.iter())
    {
        if let Err(reason) = check_source(url) {
            errors.push(ValidationError::InvalidSource {
                url: url.clone(),
                reason,
            });
        }
    }

    if config.provision.max_attempts == 0 {
        errors.push(ValidationError::ZeroBound { field: "download attempts" });
    }
    if config.provision.boot_rounds == 0 {
        errors.push(ValidationError::ZeroBound { field: "boot rounds" });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`, hex digits of either case.
pub fn is_canonical_uuid(token: &str) -> bool {
    token.len() == 36
        && token.char_indices().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        })
        && uuid::Uuid::try_parse(token).is_ok()
}

fn is_path_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '~' | '-'))
}

fn check_source(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("unsupported scheme '{}'", other)),
    }
}
