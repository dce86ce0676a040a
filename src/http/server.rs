//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router: status, health, subscription, relay fallback
//! - Wire up middleware (tracing, request ID)
//! - Serve the listener with upgrades enabled until shutdown
//!
//! No request timeout layer is installed; relayed streams are open-ended.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::Response,
    routing::get,
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::{ServiceConfig, HEALTH_ROUTE};
use crate::http::status;
use crate::net::BridgeTracker;
use crate::relay::Relay;
use crate::supervisor::{BackendProcessHandle, SupervisorState};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub started: Instant,
    pub relay: Relay,
    pub backend: Option<watch::Receiver<BackendProcessHandle>>,
}

impl AppState {
    /// Last published backend state, if a supervisor is attached.
    pub fn backend_state(&self) -> Option<SupervisorState> {
        self.backend.as_ref().map(|rx| rx.borrow().state)
    }
}

/// Public HTTP server.
pub struct HttpServer {
    config: Arc<ServiceConfig>,
    state: AppState,
}

impl HttpServer {
    pub fn new(config: Arc<ServiceConfig>, bridges: BridgeTracker) -> Self {
        let relay = Relay::new(&config, bridges);
        let state = AppState {
            config: Arc::clone(&config),
            started: Instant::now(),
            relay,
            backend: None,
        };
        Self { config, state }
    }

    /// Report the backend supervisor's state on the status routes.
    pub fn with_backend_status(mut self, backend: watch::Receiver<BackendProcessHandle>) -> Self {
        self.state.backend = Some(backend);
        self
    }

    /// Build the Axum router with all middleware layers.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(status::status_page))
            .route(HEALTH_ROUTE, get(status::health))
            .route(&self.config.sub_route(), get(status::subscription))
            .fallback(relay_handler)
            .with_state(self.state.clone())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Serve until `shutdown` fires, then stop accepting and finish in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            relay_path = %self.config.backend.relay_path,
            transport = %self.config.backend.transport,
            "HTTP server starting"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server no longer accepting connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Everything not routed locally goes through the relay.
async fn relay_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    state.relay.handle(request).await
}
