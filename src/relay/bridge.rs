//! Bidirectional byte bridge.
//!
//! Two unidirectional copies run concurrently. The first one to finish, by
//! end-of-stream or error, ends the bridge: the writer it fed is shut down and
//! both streams are dropped, closing the other direction as well.

use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Which side ended the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Backend,
}

/// Outcome of a finished bridge.
#[derive(Debug)]
pub struct BridgeSummary {
    pub closed_by: Side,
    /// Bytes copied in the direction that finished first.
    pub bytes: u64,
    pub error: Option<io::Error>,
}

pub async fn bridge<C, B>(client: C, backend: B) -> BridgeSummary
where
    C: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut backend_read, mut backend_write) = tokio::io::split(backend);

    let upstream = async {
        let copied = tokio::io::copy(&mut client_read, &mut backend_write).await;
        let _ = backend_write.shutdown().await;
        copied
    };
    let downstream = async {
        let copied = tokio::io::copy(&mut backend_read, &mut client_write).await;
        let _ = client_write.shutdown().await;
        copied
    };

    let (closed_by, copied) = tokio::select! {
        copied = upstream => (Side::Client, copied),
        copied = downstream => (Side::Backend, copied),
    };

    match copied {
        Ok(bytes) => BridgeSummary {
            closed_by,
            bytes,
            error: None,
        },
        Err(error) => BridgeSummary {
            closed_by,
            bytes: 0,
            error: Some(error),
        },
    }
}
