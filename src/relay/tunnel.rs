//! Tunnel-passthrough relay.
//!
//! Method, path, and end-to-end headers are mirrored to the backend; request
//! and response bodies stream through unbuffered, so the backend owns framing.

use axum::body::Body;
use axum::http::{HeaderMap, Request, Uri, Version};
use axum::response::Response;

use super::{Relay, RelayError};

/// Connection-level headers that must not cross the relay.
const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
];

pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

pub(crate) async fn forward(relay: &Relay, request: Request<Body>) -> Result<Response, RelayError> {
    let (mut parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri: Uri = format!("http://{}{}", relay.backend_addr, path_and_query).parse()?;

    strip_hop_by_hop(&mut parts.headers);
    parts.uri = uri;
    parts.version = Version::HTTP_11;

    let response = relay.client.request(Request::from_parts(parts, body)).await?;

    let (mut parts, incoming) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Ok(Response::from_parts(parts, Body::new(incoming)))
}
