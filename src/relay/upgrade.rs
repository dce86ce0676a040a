//! Upgrade-handshake relay.
//!
//! The client's handshake is forwarded over a raw backend socket and the
//! backend's own reply is returned to the client. On `101` the client
//! connection is taken over from the HTTP server and bridged to the backend.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use super::bridge::bridge;
use super::handshake::{encode_request_head, read_response_head, synthesized_acceptance};
use super::{Relay, RelayError};
use crate::net::BridgeGuard;

pub(crate) async fn forward(relay: &Relay, mut request: Request<Body>) -> Result<Response, RelayError> {
    let on_upgrade = hyper::upgrade::on(&mut request);

    let mut backend = relay.connect().await?;
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let head = encode_request_head(
        request.method(),
        path_and_query,
        request.headers(),
        &relay.backend_addr,
    );
    backend
        .write_all(&head)
        .await
        .map_err(|e| RelayError::Handshake(e.into()))?;

    if relay.synthesize_accept {
        let headers = synthesized_acceptance(request.headers());
        let guard = relay.bridges.track();
        tokio::spawn(bridge_after_backend_head(
            on_upgrade,
            backend,
            relay.handshake_timeout,
            guard,
        ));
        return Ok(switching_protocols(headers));
    }

    let (reply, leftover) = tokio::time::timeout(relay.handshake_timeout, read_response_head(&mut backend))
        .await
        .map_err(|_| RelayError::HandshakeTimeout(relay.handshake_timeout))??;

    if reply.status != StatusCode::SWITCHING_PROTOCOLS {
        tracing::warn!(status = %reply.status, "Backend declined upgrade");
        let mut response = reply.status.into_response();
        response
            .headers_mut()
            .insert(header::CONNECTION, HeaderValue::from_static("close"));
        return Ok(response);
    }

    let guard = relay.bridges.track();
    tokio::spawn(run_bridge(on_upgrade, backend, leftover, guard));
    Ok(switching_protocols(reply.headers))
}

fn switching_protocols(headers: HeaderMap) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    *response.headers_mut() = headers;
    response
}

/// Compatibility mode: the client already has its acceptance, so the
/// backend's head is consumed here and only its status is checked.
async fn bridge_after_backend_head(
    on_upgrade: OnUpgrade,
    mut backend: TcpStream,
    handshake_timeout: Duration,
    guard: BridgeGuard,
) {
    let leftover = match tokio::time::timeout(handshake_timeout, read_response_head(&mut backend)).await {
        Ok(Ok((reply, leftover))) if reply.status == StatusCode::SWITCHING_PROTOCOLS => leftover,
        Ok(Ok((reply, _))) => {
            tracing::warn!(connection_id = %guard.id(), status = %reply.status, "Backend declined upgrade");
            return close_client(on_upgrade).await;
        }
        Ok(Err(e)) => {
            tracing::warn!(connection_id = %guard.id(), error = %e, "Backend handshake failed");
            return close_client(on_upgrade).await;
        }
        Err(_) => {
            tracing::warn!(connection_id = %guard.id(), "Backend handshake timed out");
            return close_client(on_upgrade).await;
        }
    };
    run_bridge(on_upgrade, backend, leftover, guard).await;
}

/// The client already holds a 101; end its stream instead of bridging.
async fn close_client(on_upgrade: OnUpgrade) {
    if let Ok(upgraded) = on_upgrade.await {
        let mut client = TokioIo::new(upgraded);
        let _ = client.shutdown().await;
    }
}

async fn run_bridge(on_upgrade: OnUpgrade, backend: TcpStream, leftover: Vec<u8>, guard: BridgeGuard) {
    let upgraded = match on_upgrade.await {
        Ok(upgraded) => upgraded,
        Err(e) => {
            tracing::debug!(connection_id = %guard.id(), error = %e, "Client upgrade failed");
            return;
        }
    };
    let mut client = TokioIo::new(upgraded);

    if !leftover.is_empty() {
        if let Err(e) = client.write_all(&leftover).await {
            tracing::debug!(connection_id = %guard.id(), error = %e, "Client closed during handshake");
            return;
        }
    }

    tracing::debug!(connection_id = %guard.id(), "Bridge established");
    let summary = bridge(client, backend).await;
    match summary.error {
        Some(e) => tracing::debug!(
            connection_id = %guard.id(),
            closed_by = ?summary.closed_by,
            error = %e,
            "Bridge closed with error"
        ),
        None => tracing::debug!(
            connection_id = %guard.id(),
            closed_by = ?summary.closed_by,
            bytes = summary.bytes,
            "Bridge closed"
        ),
    }
}
