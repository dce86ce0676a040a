//! Process specifications for the backend and the optional tunnel.
//!
//! Both are rebuilt from the immutable [`ServiceConfig`]; generated files are
//! written by the launch path before every start.

use serde_json::{json, Value};
use std::path::Path;

use crate::config::{ServiceConfig, TransportStyle, TunnelSettings};
use crate::provision::{ProvisionError, ProvisionTask};
use crate::supervisor::process::{GeneratedFile, ProcessSpec};

/// Backend configuration document for the configured transport.
pub fn backend_config_json(config: &ServiceConfig) -> Value {
    let backend = &config.backend;
    let path = backend.relay_path.as_str();

    let mut stream = json!({ "network": backend.transport.tag() });
    match backend.transport {
        TransportStyle::Ws => stream["wsSettings"] = json!({ "path": path }),
        TransportStyle::HttpUpgrade => stream["httpupgradeSettings"] = json!({ "path": path }),
        TransportStyle::Xhttp => {
            stream["xhttpSettings"] = json!({ "path": path, "mode": "auto" });
        }
    }
    if backend.tcp_fast_open {
        stream["sockopt"] = json!({ "tcpFastOpen": true });
    }

    let domain_strategy = if backend.ipv4_only { "UseIPv4" } else { "AsIs" };
    let mut direct = json!({
        "protocol": "freedom",
        "tag": "direct",
        "settings": { "domainStrategy": domain_strategy },
    });
    if backend.tcp_fast_open {
        direct["streamSettings"] = json!({ "sockopt": { "tcpFastOpen": true } });
    }

    json!({
        "log": {
            "access": "none",
            "loglevel": config.observability.log_level.backend_level(),
        },
        "inbounds": [{
            "listen": "127.0.0.1",
            "port": backend.local_port,
            "protocol": "vless",
            "settings": {
                "clients": [{ "id": config.identity, "level": 0 }],
                "decryption": "none",
            },
            "streamSettings": stream,
        }],
        "outbounds": [
            direct,
            { "protocol": "blackhole", "tag": "block" },
        ],
    })
}

/// The backend process: provisioned binary launched with `-c <config>`.
pub fn backend_process(config: &ServiceConfig) -> Result<ProcessSpec, ProvisionError> {
    let work_dir = config.work_dir.as_path();
    let binary = work_dir.join(&config.backend.binary_name);
    let config_path = work_dir.join(&config.backend.config_name);

    let provision = ProvisionTask::new(
        config.backend.binary_name.clone(),
        &config.provision.backend_urls,
        binary.clone(),
        &config.provision,
    )?;

    let mut spec = ProcessSpec::new(config.backend.binary_name.clone(), binary)
        .args([std::ffi::OsString::from("-c"), config_path.clone().into_os_string()]);
    spec.working_dir = Some(work_dir.to_path_buf());
    spec.files.push(GeneratedFile {
        path: config_path,
        contents: pretty(&backend_config_json(config)),
    });
    spec.provision = Some(provision);
    Ok(spec)
}

/// The tunnel process, when a tunnel credential is configured.
pub fn tunnel_process(config: &ServiceConfig) -> Result<Option<ProcessSpec>, ProvisionError> {
    let Some(tunnel) = &config.tunnel else {
        return Ok(None);
    };

    let work_dir = config.work_dir.as_path();
    let binary = work_dir.join(&tunnel.binary_name);
    let provision = ProvisionTask::new(
        tunnel.binary_name.clone(),
        &config.provision.tunnel_urls,
        binary.clone(),
        &config.provision,
    )?;

    let mut spec = match credentials_tunnel_id(&tunnel.credential) {
        Some(tunnel_id) => credentials_mode(config, tunnel, work_dir, &binary, &tunnel_id),
        None => ProcessSpec::new(tunnel.binary_name.clone(), binary).args([
            "tunnel",
            "--edge-ip-version",
            "auto",
            "--no-autoupdate",
            "--protocol",
            "http2",
            "run",
            "--token",
            tunnel.credential.as_str(),
        ]),
    };
    spec.working_dir = Some(work_dir.to_path_buf());
    spec.provision = Some(provision);
    Ok(Some(spec))
}

/// `TunnelID` of a JSON credentials document, if the credential is one.
fn credentials_tunnel_id(credential: &str) -> Option<String> {
    let value: Value = serde_json::from_str(credential).ok()?;
    value.get("TunnelID")?.as_str().map(str::to_owned)
}

fn credentials_mode(
    config: &ServiceConfig,
    tunnel: &TunnelSettings,
    work_dir: &Path,
    binary: &Path,
    tunnel_id: &str,
) -> ProcessSpec {
    let credentials_path = work_dir.join("tunnel.json");
    let config_path = work_dir.join("tunnel.yml");
    let hostname = tunnel
        .domain
        .as_deref()
        .unwrap_or(config.public.domain.as_str());

    let yaml = format!(
        "tunnel: {id}\n\
         credentials-file: {creds}\n\
         protocol: http2\n\
         \n\
         ingress:\n\
         \x20 - hostname: {host}\n\
         \x20   service: http://localhost:{port}\n\
         \x20   originRequest:\n\
         \x20     noTLSVerify: true\n\
         \x20 - service: http_status:404\n",
        id = tunnel_id,
        creds = credentials_path.display(),
        host = hostname,
        port = config.listener.port,
    );

    let mut spec = ProcessSpec::new(tunnel.binary_name.clone(), binary).args([
        std::ffi::OsString::from("tunnel"),
        "--edge-ip-version".into(),
        "auto".into(),
        "--config".into(),
        config_path.clone().into_os_string(),
        "run".into(),
    ]);
    spec.files.push(GeneratedFile {
        path: credentials_path,
        contents: tunnel.credential.clone(),
    });
    spec.files.push(GeneratedFile {
        path: config_path,
        contents: yaml,
    });
    spec
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
