//! Connection style classification.

use axum::http::header::{CONNECTION, UPGRADE};
use axum::http::HeaderMap;

/// How an inbound request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStyle {
    /// Served locally, never forwarded.
    Plain,
    /// Relay path plus an upgrade declaration.
    UpgradeHandshake,
    /// Relay path without an upgrade declaration.
    TunnelPassthrough,
}

impl ConnectionStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStyle::Plain => "plain",
            ConnectionStyle::UpgradeHandshake => "upgrade",
            ConnectionStyle::TunnelPassthrough => "tunnel",
        }
    }
}

/// `path` is the relay path itself or lies beneath it.
pub fn matches_relay_path(relay_path: &str, path: &str) -> bool {
    let relay_path = relay_path.trim_end_matches('/');
    match path.strip_prefix(relay_path) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// `Connection` lists the `upgrade` token and `Upgrade` names a protocol.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    let protocol_named = headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| !v.trim().is_empty());

    connection_upgrade && protocol_named
}

pub fn classify(relay_path: &str, path: &str, headers: &HeaderMap) -> ConnectionStyle {
    if !matches_relay_path(relay_path, path) {
        ConnectionStyle::Plain
    } else if is_upgrade_request(headers) {
        ConnectionStyle::UpgradeHandshake
    } else {
        ConnectionStyle::TunnelPassthrough
    }
}
