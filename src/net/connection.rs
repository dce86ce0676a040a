//! Bridge identity and lifetime tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count open bridges (upgraded connections detached from the HTTP server)
//! - Let shutdown wait, bounded, for open bridges to drain

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a relayed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Tracks open bridges for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct BridgeTracker {
    active_count: Arc<AtomicU64>,
}

impl BridgeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new open bridge. Returns a guard that decrements on drop.
    pub fn track(&self) -> BridgeGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        metrics::bridge_opened();
        BridgeGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    /// Get current open bridge count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until all bridges are closed or `deadline` elapses.
    ///
    /// Returns the number of bridges still open.
    pub async fn wait_for_drain(&self, deadline: Duration) -> u64 {
        let drained = tokio::time::timeout(deadline, async {
            while self.active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        match drained {
            Ok(()) => 0,
            Err(_) => self.active_count(),
        }
    }
}

/// Guard that tracks a bridge's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct BridgeGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl BridgeGuard {
    /// Get this bridge's connection ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for BridgeGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        metrics::bridge_closed();
        tracing::trace!(connection_id = %self.id, "Bridge closed");
    }
}
