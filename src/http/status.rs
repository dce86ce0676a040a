//! Locally served routes: status page, health, subscription.
//!
//! None of these touch the backend; they answer the same whether the backend
//! is starting, running, restarting, or gone.

use axum::{
    extract::State,
    http::header,
    response::{Html, IntoResponse},
    Json,
};
use serde::Serialize;
use std::time::Duration;

use crate::http::descriptor::encoded_descriptor;
use crate::http::server::AppState;
use crate::supervisor::SupervisorState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    /// Seconds since startup.
    pub uptime: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<SupervisorState>,
}

/// Human-readable duration, e.g. `1d 2h 3m 4s`.
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (days, hours, minutes, seconds) = (secs / 86_400, secs / 3_600 % 24, secs / 60 % 60, secs % 60);
    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

pub async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        uptime: state.started.elapsed().as_secs(),
        backend: state.backend_state(),
    })
}

pub async fn subscription(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        encoded_descriptor(&state.config),
    )
}

pub async fn status_page(State(state): State<AppState>) -> Html<String> {
    let config = &state.config;
    let backend = state
        .backend_state()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{name}</title>
<style>
body {{ font-family: system-ui, sans-serif; max-width: 40rem; margin: 3rem auto; color: #222; }}
dt {{ font-weight: 600; margin-top: .75rem; }}
code {{ background: #f3f3f3; padding: .1rem .3rem; }}
</style>
</head>
<body>
<h1>{name}</h1>
<dl>
<dt>Status</dt><dd>online</dd>
<dt>Uptime</dt><dd>{uptime}</dd>
<dt>Address</dt><dd><code>{domain}:{port}</code></dd>
<dt>Transport</dt><dd>{transport}</dd>
<dt>Backend</dt><dd>{backend}</dd>
<dt>Subscription</dt><dd><a href="{sub}">{sub}</a></dd>
</dl>
</body>
</html>
"#,
        name = escape(&config.public.node_name),
        uptime = format_uptime(state.started.elapsed()),
        domain = escape(config.advertised_domain()),
        port = config.public.port,
        transport = config.backend.transport,
        backend = backend,
        sub = escape(&config.sub_route()),
    ))
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_formatting() {
        assert_eq!(format_uptime(Duration::from_secs(5)), "5s");
        assert_eq!(format_uptime(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_uptime(Duration::from_secs(3_725)), "1h 2m 5s");
        assert_eq!(format_uptime(Duration::from_secs(90_061)), "1d 1h 1m 1s");
    }

    #[test]
    fn markup_is_escaped() {
        assert_eq!(escape("<b>&\"x\"</b>"), "&lt;b&gt;&amp;&quot;x&quot;&lt;/b&gt;");
    }
}
