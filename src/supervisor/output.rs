//! Backend output tap.
//!
//! Each stdout/stderr pipe of a supervised process gets its own task that reads
//! lines as they arrive and re-emits them through `tracing`. The pipes are
//! drained continuously so the child never blocks on a full pipe, and nothing
//! here feeds back into lifecycle decisions.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

/// Severity inferred from a line of backend output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    Error,
    Warning,
    Info,
}

/// Classify a line by keyword, case-insensitively.
pub fn classify_line(line: &str) -> LineClass {
    let lower = line.to_ascii_lowercase();
    if ["error", "failed", "panic", "fatal"]
        .iter()
        .any(|k| lower.contains(k))
    {
        LineClass::Error
    } else if lower.contains("warn") {
        LineClass::Warning
    } else {
        LineClass::Info
    }
}

/// Spawn a task that drains `stream` line by line until EOF.
///
/// Bytes that are not valid UTF-8 are logged lossily. A read error stops line
/// handling but the pipe keeps being drained, since a closed read end would
/// kill the child with SIGPIPE on its next write.
pub fn tap<R>(process: String, stream: &'static str, reader: R) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::with_capacity(256);
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => emit(&process, stream, &String::from_utf8_lossy(&buf)),
                Err(e) => {
                    tracing::debug!(process = %process, stream, error = %e, "Output tap failed, discarding");
                    let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
                    break;
                }
            }
        }
    })
}

fn emit(process: &str, stream: &'static str, line: &str) {
    let line = line.trim_end();
    if line.is_empty() {
        return;
    }
    match classify_line(line) {
        LineClass::Error => tracing::error!(process, stream, "{line}"),
        LineClass::Warning => tracing::warn!(process, stream, "{line}"),
        LineClass::Info => tracing::info!(process, stream, "{line}"),
    }
}
