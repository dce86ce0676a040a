//! Configuration loading from the process environment.
//!
//! Every option is both a `--flag` and an environment variable. The parsed
//! [`Args`] are resolved into a [`ServiceConfig`] exactly once, at process
//! entry; nothing else in the crate reads the environment.

use clap::{ArgAction, Parser};
use std::path::PathBuf;
use thiserror::Error;

use crate::config::schema::{
    BackendSettings, ListenerConfig, LogLevel, ObservabilityConfig, ProvisionConfig,
    PublicEndpoint, ServiceConfig, SupervisorConfig, TimeoutConfig, TransportStyle,
    TunnelSettings, DEFAULT_IDENTITY,
};
use crate::config::validation::{validate_config, ValidationError};
use crate::provision::sources;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),

    #[error("working directory {path:?} is unusable: {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Parser, Debug, Clone)]
#[command(name = "backend-relay")]
#[command(about = "Public relay in front of a supervised local backend process", long_about = None)]
pub struct Args {
    /// Identity token shared with the backend (canonical UUID).
    #[arg(long, env = "UUID", default_value = DEFAULT_IDENTITY)]
    pub uuid: String,

    /// Public listen port.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Public bind address.
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Public domain advertised to clients.
    #[arg(long, env = "DOMAIN")]
    pub domain: Option<String>,

    /// Domain provided by the hosting platform, used when DOMAIN is unset.
    #[arg(long, env = "RAILWAY_STATIC_URL", hide = true)]
    pub platform_domain: Option<String>,

    /// Port advertised in the connection descriptor.
    #[arg(long, env = "PUBLIC_PORT", default_value_t = 443)]
    pub public_port: u16,

    /// Label appended to the connection descriptor.
    #[arg(long, env = "NAME", default_value = "relay")]
    pub name: String,

    /// Subscription route segment.
    #[arg(long, env = "SUB_PATH", default_value = "sub")]
    pub sub_path: String,

    /// Working directory for downloaded and generated files.
    #[arg(long, env = "FILE_PATH", default_value = "./bin_core")]
    pub file_path: PathBuf,

    /// Log verbosity.
    #[arg(long, env = "LOG_LEVEL", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Loopback port the backend listens on.
    #[arg(long, env = "BACKEND_PORT", default_value_t = 3000)]
    pub backend_port: u16,

    /// Transport style relayed to the backend.
    #[arg(long, env = "TRANSPORT", value_enum, default_value_t = TransportStyle::Ws)]
    pub transport: TransportStyle,

    /// Public path relayed to the backend; defaults per transport style.
    #[arg(long, env = "RELAY_PATH")]
    pub relay_path: Option<String>,

    #[arg(long, env = "TCP_FAST_OPEN", action = ArgAction::Set, default_value_t = true)]
    pub tcp_fast_open: bool,

    #[arg(long, env = "IPV4_ONLY", action = ArgAction::Set, default_value_t = true)]
    pub ipv4_only: bool,

    /// Answer upgrade handshakes locally (compatibility mode).
    #[arg(long, env = "SYNTHESIZE_ACCEPT", action = ArgAction::Set, default_value_t = false)]
    pub synthesize_accept: bool,

    /// Automatic restarts before a supervised process is given up.
    #[arg(long, env = "RESTART_LIMIT", default_value_t = 5)]
    pub restart_limit: u32,

    /// Seconds between a crash and the next launch.
    #[arg(long, env = "RESTART_DELAY", default_value_t = 10)]
    pub restart_delay: u64,

    /// Seconds between a failed launch and the next attempt.
    #[arg(long, env = "LAUNCH_RETRY_DELAY", default_value_t = 3)]
    pub launch_retry_delay: u64,

    #[arg(long, env = "STARTUP_WINDOW_MS", default_value_t = 1000)]
    pub startup_window_ms: u64,

    /// Seconds a process gets to exit after the termination request.
    #[arg(long, env = "STOP_GRACE", default_value_t = 5)]
    pub stop_grace: u64,

    /// Backend executable sources, comma separated, in priority order.
    #[arg(long, env = "BACKEND_URLS", value_delimiter = ',')]
    pub backend_urls: Vec<String>,

    /// Tunnel executable sources, comma separated, in priority order.
    #[arg(long, env = "TUNNEL_URLS", value_delimiter = ',')]
    pub tunnel_urls: Vec<String>,

    #[arg(long, env = "DOWNLOAD_ATTEMPTS", default_value_t = 3)]
    pub download_attempts: u32,

    /// Per-attempt download timeout in seconds.
    #[arg(long, env = "DOWNLOAD_TIMEOUT", default_value_t = 30)]
    pub download_timeout: u64,

    #[arg(long, env = "DOWNLOAD_BACKOFF_MS", default_value_t = 2000)]
    pub download_backoff_ms: u64,

    /// Rounds over all sources during the initial boot.
    #[arg(long, env = "BOOT_ROUNDS", default_value_t = 3)]
    pub boot_rounds: u32,

    /// Tunnel connector token or JSON credentials; enables the tunnel process.
    #[arg(long, env = "TUNNEL_TOKEN")]
    pub tunnel_token: Option<String>,

    /// Hostname routed through the tunnel.
    #[arg(long, env = "TUNNEL_DOMAIN")]
    pub tunnel_domain: Option<String>,

    #[arg(long, env = "CONNECT_TIMEOUT", default_value_t = 5)]
    pub connect_timeout: u64,

    #[arg(long, env = "HANDSHAKE_TIMEOUT", default_value_t = 10)]
    pub handshake_timeout: u64,

    /// Seconds open bridges get to finish on shutdown.
    #[arg(long, env = "DRAIN_TIMEOUT", default_value_t = 5)]
    pub drain_timeout: u64,

    /// Prometheus endpoint bind address.
    #[arg(long, env = "METRICS_ADDRESS")]
    pub metrics_address: Option<String>,
}

impl Args {
    /// Resolve arguments into a configuration without validating it.
    pub fn into_config(self) -> ServiceConfig {
        let domain = non_empty(self.domain)
            .or_else(|| non_empty(self.platform_domain))
            .unwrap_or_else(|| "localhost".to_string());

        let relay_path = non_empty(self.relay_path)
            .unwrap_or_else(|| self.transport.default_path().to_string());

        let backend_urls = non_empty_list(self.backend_urls)
            .unwrap_or_else(|| sources::default_backend_sources(std::env::consts::ARCH));
        let tunnel_urls = non_empty_list(self.tunnel_urls)
            .unwrap_or_else(|| sources::default_tunnel_sources(std::env::consts::ARCH));

        let tunnel = non_empty(self.tunnel_token).map(|credential| TunnelSettings {
            credential,
            domain: non_empty(self.tunnel_domain),
            binary_name: "cloudflared".to_string(),
        });

        ServiceConfig {
            identity: self.uuid.trim().to_string(),
            listener: ListenerConfig {
                bind_address: self.bind_address,
                port: self.port,
            },
            public: PublicEndpoint {
                domain,
                port: self.public_port,
                node_name: self.name,
            },
            sub_path: self.sub_path.trim_start_matches('/').to_string(),
            work_dir: self.file_path,
            backend: BackendSettings {
                transport: self.transport,
                relay_path,
                local_port: self.backend_port,
                tcp_fast_open: self.tcp_fast_open,
                ipv4_only: self.ipv4_only,
                synthesize_accept: self.synthesize_accept,
                ..BackendSettings::default()
            },
            tunnel,
            supervisor: SupervisorConfig {
                max_restarts: self.restart_limit,
                restart_delay_secs: self.restart_delay,
                launch_retry_delay_secs: self.launch_retry_delay,
                startup_window_ms: self.startup_window_ms,
                stop_grace_secs: self.stop_grace,
            },
            provision: ProvisionConfig {
                backend_urls,
                tunnel_urls,
                max_attempts: self.download_attempts,
                attempt_timeout_secs: self.download_timeout,
                backoff_base_ms: self.download_backoff_ms,
                boot_rounds: self.boot_rounds,
            },
            timeouts: TimeoutConfig {
                connect_secs: self.connect_timeout,
                handshake_secs: self.handshake_timeout,
                drain_secs: self.drain_timeout,
            },
            observability: ObservabilityConfig {
                log_level: self.log_level,
                metrics_address: non_empty(self.metrics_address),
            },
        }
    }
}

/// Resolve, validate, and prepare the working directory.
///
/// Any error here is fatal: the caller must exit before binding a listener.
pub fn load(args: Args) -> Result<ServiceConfig, ConfigError> {
    let config = args.into_config();
    validate_config(&config).map_err(ConfigError::Validation)?;

    std::fs::create_dir_all(&config.work_dir).map_err(|source| ConfigError::WorkDir {
        path: config.work_dir.clone(),
        source,
    })?;

    Ok(config)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn non_empty_list(values: Vec<String>) -> Option<Vec<String>> {
    let values: Vec<String> = values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    (!values.is_empty()).then_some(values)
}
