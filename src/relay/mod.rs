//! Connection relay subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request on an unrouted path
//!     → classify.rs (plain / upgrade-handshake / tunnel-passthrough)
//!     → plain:   404, backend never contacted
//!     → upgrade: upgrade.rs (raw backend socket, forwarded handshake, bridge.rs)
//!     → tunnel:  tunnel.rs (streaming request/response through the HTTP client)
//! ```
//!
//! # Design Decisions
//! - One fresh backend connection per client connection, never retried
//! - Backend failures are connection-scoped and become HTTP error responses
//! - Upgraded bridges are detached from the HTTP server and tracked for drain

pub mod bridge;
pub mod classify;
pub mod handshake;
pub mod tunnel;
pub mod upgrade;

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

use crate::config::ServiceConfig;
use crate::net::BridgeTracker;
use crate::observability::metrics;

pub use bridge::{bridge, BridgeSummary, Side};
pub use classify::{classify, ConnectionStyle};
pub use handshake::HandshakeError;

/// Connection-scoped relay failure.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("backend unavailable at {addr}: {source}")]
    BackendUnavailable {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("backend connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("backend handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error("backend request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    #[error("invalid backend uri: {0}")]
    InvalidUri(#[from] axum::http::uri::InvalidUri),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::ConnectTimeout(_) | RelayError::HandshakeTimeout(_) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            RelayError::InvalidUri(_) => StatusCode::BAD_REQUEST,
            RelayError::BackendUnavailable { .. }
            | RelayError::Handshake(_)
            | RelayError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn is_unavailable(&self) -> bool {
        match self {
            RelayError::BackendUnavailable { .. } | RelayError::ConnectTimeout(_) => true,
            RelayError::Upstream(e) => e.is_connect(),
            _ => false,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        if self.is_unavailable() {
            metrics::record_backend_unavailable();
        }
        let mut response = (self.status(), self.to_string()).into_response();
        response
            .headers_mut()
            .insert(header::CONNECTION, HeaderValue::from_static("close"));
        response
    }
}

/// Relay settings and shared resources, cloned into every handler.
#[derive(Clone)]
pub struct Relay {
    relay_path: String,
    backend_addr: String,
    connect_timeout: Duration,
    handshake_timeout: Duration,
    synthesize_accept: bool,
    client: Client<HttpConnector, Body>,
    bridges: BridgeTracker,
}

impl Relay {
    pub fn new(config: &ServiceConfig, bridges: BridgeTracker) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.timeouts.connect()));
        connector.set_nodelay(true);

        // One fresh backend connection per relayed request, never re-sent.
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .retry_canceled_requests(false)
            .build(connector);

        Self {
            relay_path: config.backend.relay_path.clone(),
            backend_addr: config.backend_address(),
            connect_timeout: config.timeouts.connect(),
            handshake_timeout: config.timeouts.handshake(),
            synthesize_accept: config.backend.synthesize_accept,
            client,
            bridges,
        }
    }

    /// Classify and serve one inbound request.
    pub async fn handle(&self, request: Request<Body>) -> Response {
        let style = classify(&self.relay_path, request.uri().path(), request.headers());
        tracing::debug!(
            style = style.as_str(),
            method = %request.method(),
            path = %request.uri().path(),
            "Classified request"
        );

        let result = match style {
            ConnectionStyle::Plain => return StatusCode::NOT_FOUND.into_response(),
            ConnectionStyle::UpgradeHandshake => upgrade::forward(self, request).await,
            ConnectionStyle::TunnelPassthrough => tunnel::forward(self, request).await,
        };
        metrics::record_relay_request(style.as_str());

        result.unwrap_or_else(|e| {
            tracing::warn!(style = style.as_str(), error = %e, "Relay failed");
            e.into_response()
        })
    }

    /// Open a fresh backend connection; never retried.
    async fn connect(&self) -> Result<TcpStream, RelayError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(self.backend_addr.as_str()))
            .await
            .map_err(|_| RelayError::ConnectTimeout(self.connect_timeout))?
            .map_err(|source| RelayError::BackendUnavailable {
                addr: self.backend_addr.clone(),
                source,
            })?;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }
}
