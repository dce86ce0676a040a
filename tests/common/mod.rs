//! Shared utilities for integration tests.

#![allow(dead_code)]

use axum::{body::Bytes, extract::State, http::StatusCode, routing::get, Router};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

use backend_relay::config::ServiceConfig;
use backend_relay::net::BridgeTracker;
use backend_relay::{HttpServer, Shutdown};

/// A port nothing listens on.
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Fresh scratch directory under the system temp dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("backend-relay-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// A running relay server.
pub struct RelayHandle {
    pub addr: SocketAddr,
    pub bridges: BridgeTracker,
    pub shutdown: Shutdown,
}

/// Serve `config` on an ephemeral loopback port.
pub async fn start_relay(config: ServiceConfig) -> RelayHandle {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let bridges = BridgeTracker::new();
    let shutdown = Shutdown::new();

    let server = HttpServer::new(Arc::new(config), bridges.clone());
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });

    RelayHandle {
        addr,
        bridges,
        shutdown,
    }
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// Counters kept by the raw upgrade backend.
#[derive(Debug, Default)]
pub struct BackendStats {
    pub accepted: AtomicUsize,
    pub open: AtomicUsize,
}

impl BackendStats {
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

/// Raw TCP backend that accepts upgrades with a correctly derived key.
///
/// After the handshake: `PING` is answered with `PONG`, `QUIT` closes the
/// socket, anything else is echoed.
pub async fn start_upgrade_backend() -> (u16, Arc<BackendStats>) {
    start_raw_backend(|key| {
        format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
            derive_accept_key(key.as_bytes())
        )
    })
    .await
}

/// Raw TCP backend that refuses every upgrade with `403`.
pub async fn start_declining_backend() -> (u16, Arc<BackendStats>) {
    start_raw_backend(|_| "HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n".to_string()).await
}

async fn start_raw_backend<F>(reply: F) -> (u16, Arc<BackendStats>)
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let stats = Arc::new(BackendStats::default());
    let reply = Arc::new(reply);

    let accept_stats = Arc::clone(&stats);
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            accept_stats.accepted.fetch_add(1, Ordering::SeqCst);
            accept_stats.open.fetch_add(1, Ordering::SeqCst);
            let stats = Arc::clone(&accept_stats);
            let reply = Arc::clone(&reply);
            tokio::spawn(async move {
                serve_raw(socket, reply.as_ref()).await;
                stats.open.fetch_sub(1, Ordering::SeqCst);
            });
        }
    });

    (port, stats)
}

async fn serve_raw<F: Fn(&str) -> String>(mut socket: TcpStream, reply: &F) {
    let Some(head) = read_head(&mut socket).await else {
        return;
    };
    let key = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("sec-websocket-key")
                .then(|| value.trim().to_string())
        })
        .unwrap_or_default();

    if socket.write_all(reply(&key).as_bytes()).await.is_err() {
        return;
    }

    let mut buf = [0u8; 1024];
    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        let answer: &[u8] = match &buf[..n] {
            b"PING" => b"PONG",
            b"QUIT" => return,
            other => other,
        };
        if socket.write_all(answer).await.is_err() {
            return;
        }
    }
}

/// Keep-alive HTTP backend answering every request on a connection with `ok`.
pub async fn start_keepalive_http_backend() -> (u16, Arc<BackendStats>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let stats = Arc::new(BackendStats::default());

    let accept_stats = Arc::clone(&stats);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            accept_stats.accepted.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                while read_head(&mut socket).await.is_some() {
                    let reply = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
                    if socket.write_all(reply).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    (port, stats)
}

/// Read up to and including the blank line ending an HTTP head.
pub async fn read_head(socket: &mut TcpStream) -> Option<String> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match socket.read(&mut byte).await {
            Ok(0) | Err(_) => return None,
            Ok(_) => head.push(byte[0]),
        }
        if head.len() > 16 * 1024 {
            return None;
        }
    }
    String::from_utf8(head).ok()
}

/// WebSocket echo backend built on tokio-tungstenite.
pub async fn start_ws_echo_backend() -> u16 {
    use futures_util::{SinkExt, StreamExt};

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(socket).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    if msg.is_text() || msg.is_binary() {
                        if ws.send(msg).await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    });
    port
}

/// Axum backend echoing request bodies on every path.
pub async fn start_echo_http_backend() -> u16 {
    let app = Router::new().fallback(|body: Bytes| async move { body });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    port
}

/// Axum file server answering `GET /artifact` with `status` and `body`, counting hits.
pub async fn start_artifact_server(status: StatusCode, body: &'static [u8]) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));

    async fn artifact(
        State((hits, status, body)): State<(Arc<AtomicUsize>, StatusCode, &'static [u8])>,
    ) -> (StatusCode, &'static [u8]) {
        hits.fetch_add(1, Ordering::SeqCst);
        (status, body)
    }

    let app = Router::new()
        .route("/artifact", get(artifact))
        .with_state((Arc::clone(&hits), status, body));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (format!("http://{}/artifact", addr), hits)
}

/// Serve `body` as a zip release at `/releases/Xray-linux-64.zip`.
pub async fn start_archive_server(body: Vec<u8>) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));

    async fn archive(State((hits, body)): State<(Arc<AtomicUsize>, Bytes)>) -> Bytes {
        hits.fetch_add(1, Ordering::SeqCst);
        body
    }

    let app = Router::new()
        .route("/releases/Xray-linux-64.zip", get(archive))
        .with_state((Arc::clone(&hits), Bytes::from(body)));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (format!("http://{}/releases/Xray-linux-64.zip", addr), hits)
}

/// Zip archive holding each `(name, contents)` pair.
pub fn zip_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    use std::io::Write;
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, contents) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Sends a few body bytes, then never finishes the response.
pub async fn start_stalling_server() -> String {
    async fn stall() -> axum::body::Body {
        let first = futures_util::stream::iter([Ok::<_, std::io::Error>(Bytes::from_static(b"partial"))]);
        axum::body::Body::from_stream(futures_util::StreamExt::chain(first, futures_util::stream::pending()))
    }

    let app = Router::new().route("/artifact", get(stall));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    format!("http://{}/artifact", addr)
}

/// Raw upgrade request for `path`.
pub fn upgrade_request(path: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\nHost: relay.test\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
        path
    )
}

/// Open a client connection and complete an upgrade through the relay.
pub async fn upgraded_client(relay: SocketAddr, path: &str) -> (TcpStream, String) {
    let mut stream = TcpStream::connect(relay).await.unwrap();
    stream.write_all(upgrade_request(path).as_bytes()).await.unwrap();
    let head = tokio::time::timeout(Duration::from_secs(5), read_head(&mut stream))
        .await
        .expect("relay did not answer")
        .expect("relay closed before answering");
    (stream, head)
}

/// Poll `check` until it holds or `deadline` passes.
pub async fn eventually<F: Fn() -> bool>(deadline: Duration, check: F) -> bool {
    let started = std::time::Instant::now();
    while started.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
