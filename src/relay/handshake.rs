//! Upgrade handshake bytes on the backend side.
//!
//! The client's request is re-encoded as an HTTP/1.1 request head so the
//! backend can compute its own acceptance. The backend's reply head is parsed
//! incrementally; any bytes past the head belong to the upgraded stream.

use axum::http::header::{CONNECTION, HOST, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

/// Upper bound on a backend response head.
pub const MAX_HEAD_BYTES: usize = 16 * 1024;

const MAX_HEADERS: usize = 64;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("backend i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed backend response: {0}")]
    Malformed(#[from] httparse::Error),

    #[error("backend response head exceeds {} bytes", MAX_HEAD_BYTES)]
    TooLarge,

    #[error("backend closed the connection before answering")]
    Closed,
}

/// Status line and headers of a backend reply.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Encode a request head for the backend, keeping every client header.
pub fn encode_request_head(
    method: &Method,
    path_and_query: &str,
    headers: &HeaderMap,
    backend_host: &str,
) -> Vec<u8> {
    let mut head = Vec::with_capacity(512);
    head.extend_from_slice(method.as_str().as_bytes());
    head.push(b' ');
    head.extend_from_slice(path_and_query.as_bytes());
    head.extend_from_slice(b" HTTP/1.1\r\n");

    if !headers.contains_key(HOST) {
        push_header(&mut head, HOST.as_str(), backend_host.as_bytes());
    }
    for (name, value) in headers {
        push_header(&mut head, name.as_str(), value.as_bytes());
    }
    head.extend_from_slice(b"\r\n");
    head
}

fn push_header(head: &mut Vec<u8>, name: &str, value: &[u8]) {
    head.extend_from_slice(name.as_bytes());
    head.extend_from_slice(b": ");
    head.extend_from_slice(value);
    head.extend_from_slice(b"\r\n");
}

/// Parse a complete response head from the front of `buf`.
///
/// Returns `None` while more bytes are needed, otherwise the head and its length.
pub fn parse_response_head(buf: &[u8]) -> Result<Option<(ResponseHead, usize)>, HandshakeError> {
    let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut raw);

    let consumed = match response.parse(buf)? {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Ok(None),
    };

    let status = response
        .code
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or(HandshakeError::Malformed(httparse::Error::Status))?;

    let mut headers = HeaderMap::with_capacity(response.headers.len());
    for header in response.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|_| HandshakeError::Malformed(httparse::Error::HeaderName))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|_| HandshakeError::Malformed(httparse::Error::HeaderValue))?;
        headers.append(name, value);
    }

    Ok(Some((ResponseHead { status, headers }, consumed)))
}

/// Read until a full response head arrives.
///
/// Returns the head and whatever stream bytes followed it in the same reads.
pub async fn read_response_head<R>(reader: &mut R) -> Result<(ResponseHead, Vec<u8>), HandshakeError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(HandshakeError::Closed);
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some((head, consumed)) = parse_response_head(&buf)? {
            let leftover = buf.split_off(consumed);
            return Ok((head, leftover));
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(HandshakeError::TooLarge);
        }
    }
}

/// Acceptance headers computed locally for the compatibility mode.
pub fn synthesized_acceptance(request: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let protocol = request
        .get(UPGRADE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("websocket"));
    headers.insert(UPGRADE, protocol);
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));

    if let Some(key) = request.get(SEC_WEBSOCKET_KEY) {
        if let Ok(accept) = HeaderValue::from_str(&derive_accept_key(key.as_bytes())) {
            headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
        }
    }
    headers
}
