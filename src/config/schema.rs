//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits so a resolved configuration can be dumped
//! for diagnostics, and every field has a default.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Identity token used when none is supplied.
pub const DEFAULT_IDENTITY: &str = "9afd1229-b893-40c1-84dd-51e7ce204913";

/// Root configuration for the relay. Immutable after startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Identity token (canonical hyphenated UUID) shared with the backend.
    pub identity: String,

    /// Public listener settings.
    pub listener: ListenerConfig,

    /// Publicly advertised endpoint used by the status page and descriptor.
    pub public: PublicEndpoint,

    /// Path segment of the subscription (descriptor) route, without slashes.
    pub sub_path: String,

    /// Directory holding downloaded artifacts and generated files.
    pub work_dir: PathBuf,

    /// Backend process and transport settings.
    pub backend: BackendSettings,

    /// Optional companion tunnel process.
    pub tunnel: Option<TunnelSettings>,

    /// Restart policy of the process supervisors.
    pub supervisor: SupervisorConfig,

    /// Artifact download settings.
    pub provision: ProvisionConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Public listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0").
    pub bind_address: String,

    /// Public listen port.
    pub port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ListenerConfig {
    /// `host:port` string suitable for binding.
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// The address clients are told to connect to. TLS is terminated in front of us.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PublicEndpoint {
    /// Public domain or host.
    pub domain: String,

    /// Port advertised in the descriptor.
    pub port: u16,

    /// Label appended to the descriptor.
    pub node_name: String,
}

impl Default for PublicEndpoint {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            port: 443,
            node_name: "relay".to_string(),
        }
    }
}

/// How clients establish relayed streams with the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportStyle {
    /// WebSocket upgrade.
    Ws,
    /// Bare HTTP upgrade without WebSocket framing.
    #[value(name = "httpupgrade")]
    HttpUpgrade,
    /// Streaming request/response bodies without an upgrade.
    Xhttp,
}

impl TransportStyle {
    /// Tag used in the backend configuration and in the descriptor.
    pub fn tag(&self) -> &'static str {
        match self {
            TransportStyle::Ws => "ws",
            TransportStyle::HttpUpgrade => "httpupgrade",
            TransportStyle::Xhttp => "xhttp",
        }
    }

    /// Relay path used when none is configured.
    pub fn default_path(&self) -> &'static str {
        match self {
            TransportStyle::Ws => "/speed",
            TransportStyle::HttpUpgrade => "/upgrade",
            TransportStyle::Xhttp => "/xhttp",
        }
    }
}

impl fmt::Display for TransportStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Ordered log verbosity levels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Equivalent level name understood by the backend executable.
    pub fn backend_level(&self) -> &'static str {
        match self {
            LogLevel::Trace | LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warning",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend process settings: transport style plus feature flags.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Transport style the backend listens with.
    pub transport: TransportStyle,

    /// Public path forwarded to the backend.
    pub relay_path: String,

    /// Port the backend listens on, loopback only.
    pub local_port: u16,

    /// Enable TCP Fast Open on backend sockets.
    pub tcp_fast_open: bool,

    /// Resolve outbound destinations over IPv4 only.
    pub ipv4_only: bool,

    /// Answer upgrade handshakes locally instead of relaying the backend's reply.
    pub synthesize_accept: bool,

    /// Executable file name inside the working directory.
    pub binary_name: String,

    /// Generated configuration file name inside the working directory.
    pub config_name: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            transport: TransportStyle::Ws,
            relay_path: TransportStyle::Ws.default_path().to_string(),
            local_port: 3000,
            tcp_fast_open: true,
            ipv4_only: true,
            synthesize_accept: false,
            binary_name: "xray".to_string(),
            config_name: "config.json".to_string(),
        }
    }
}

/// Companion tunnel settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TunnelSettings {
    /// Either a connector token or a JSON credentials document.
    pub credential: String,

    /// Hostname routed through the tunnel.
    pub domain: Option<String>,

    /// Executable file name inside the working directory.
    pub binary_name: String,
}

/// Restart policy configuration shared by all supervised processes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Maximum automatic restarts before giving up.
    pub max_restarts: u32,

    /// Delay before restarting after a crash, in seconds.
    pub restart_delay_secs: u64,

    /// Delay before retrying after a provisioning or launch failure, in seconds.
    pub launch_retry_delay_secs: u64,

    /// How long a fresh process must stay up to count as running, in milliseconds.
    pub startup_window_ms: u64,

    /// Grace period between the termination request and a forced kill, in seconds.
    pub stop_grace_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            restart_delay_secs: 10,
            launch_retry_delay_secs: 3,
            startup_window_ms: 1000,
            stop_grace_secs: 5,
        }
    }
}

/// Artifact download configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Candidate sources for the backend executable, in priority order.
    pub backend_urls: Vec<String>,

    /// Candidate sources for the tunnel executable, in priority order.
    pub tunnel_urls: Vec<String>,

    /// Attempts per source.
    pub max_attempts: u32,

    /// Per-attempt timeout in seconds.
    pub attempt_timeout_secs: u64,

    /// Linear backoff step between attempts, in milliseconds.
    pub backoff_base_ms: u64,

    /// Boot-level rounds over the whole source list before giving up.
    pub boot_rounds: u32,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            backend_urls: Vec::new(),
            tunnel_urls: Vec::new(),
            max_attempts: 3,
            attempt_timeout_secs: 30,
            backoff_base_ms: 2000,
            boot_rounds: 3,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Backend connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time allowed for the backend to answer an upgrade handshake, in seconds.
    pub handshake_secs: u64,

    /// Time detached bridges get to finish on shutdown, in seconds.
    pub drain_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            handshake_secs: 10,
            drain_secs: 5,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn handshake(&self) -> Duration {
        Duration::from_secs(self.handshake_secs)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_secs(self.drain_secs)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level.
    pub log_level: LogLevel,

    /// Prometheus endpoint bind address; disabled when unset.
    pub metrics_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            metrics_address: None,
        }
    }
}

impl ServiceConfig {
    /// Domain advertised to clients. The tunnel hostname wins when present.
    pub fn advertised_domain(&self) -> &str {
        self.tunnel
            .as_ref()
            .and_then(|t| t.domain.as_deref())
            .unwrap_or(&self.public.domain)
    }

    /// Absolute route of the subscription endpoint.
    pub fn sub_route(&self) -> String {
        format!("/{}", self.sub_path)
    }

    /// Loopback address of the backend.
    pub fn backend_address(&self) -> String {
        format!("127.0.0.1:{}", self.backend.local_port)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            identity: DEFAULT_IDENTITY.to_string(),
            listener: ListenerConfig::default(),
            public: PublicEndpoint::default(),
            sub_path: "sub".to_string(),
            work_dir: PathBuf::from("./bin_core"),
            backend: BackendSettings::default(),
            tunnel: None,
            supervisor: SupervisorConfig::default(),
            provision: ProvisionConfig::default(),
            timeouts: TimeoutConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
