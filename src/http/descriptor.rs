//! Connection descriptor served on the subscription route.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use url::form_urlencoded::byte_serialize;

use crate::config::{ServiceConfig, TransportStyle};

/// Plain descriptor link for the current configuration.
pub fn descriptor_link(config: &ServiceConfig) -> String {
    let domain = config.advertised_domain();
    let transport = config.backend.transport;
    let path: String = byte_serialize(config.backend.relay_path.as_bytes()).collect();

    let mut link = format!(
        "vless://{id}@{domain}:{port}?encryption=none&security=tls&sni={domain}&fp=chrome&type={tag}&host={domain}&path={path}",
        id = config.identity,
        domain = domain,
        port = config.public.port,
        tag = transport.tag(),
        path = path,
    );
    if transport == TransportStyle::Xhttp {
        link.push_str("&mode=auto");
    }
    link.push('#');
    link.push_str(&config.public.node_name);
    link
}

/// Base64 (standard alphabet) body of the subscription route.
pub fn encoded_descriptor(config: &ServiceConfig) -> String {
    STANDARD.encode(descriptor_link(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TunnelSettings;

    #[test]
    fn ws_link_has_expected_shape() {
        let mut config = ServiceConfig::default();
        config.public.domain = "relay.example.com".into();
        config.public.node_name = "edge-1".into();

        assert_eq!(
            descriptor_link(&config),
            format!(
                "vless://{}@relay.example.com:443?encryption=none&security=tls&sni=relay.example.com\
                 &fp=chrome&type=ws&host=relay.example.com&path=%2Fspeed#edge-1",
                config.identity
            )
        );
    }

    #[test]
    fn xhttp_link_carries_mode() {
        let mut config = ServiceConfig::default();
        config.backend.transport = TransportStyle::Xhttp;
        config.backend.relay_path = "/xhttp".into();
        let link = descriptor_link(&config);
        assert!(link.contains("type=xhttp"));
        assert!(link.contains("path=%2Fxhttp&mode=auto#"));
    }

    #[test]
    fn tunnel_domain_is_advertised() {
        let mut config = ServiceConfig::default();
        config.tunnel = Some(TunnelSettings {
            credential: "token".into(),
            domain: Some("tunnel.example.net".into()),
            binary_name: "cloudflared".into(),
        });
        assert!(descriptor_link(&config).contains("@tunnel.example.net:443"));
    }

    #[test]
    fn encoding_is_deterministic_and_decodes() {
        let config = ServiceConfig::default();
        let encoded = encoded_descriptor(&config);
        assert_eq!(encoded, encoded_descriptor(&config));
        let decoded = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
        assert_eq!(decoded, descriptor_link(&config));
        assert_eq!(decoded.matches(&config.identity).count(), 1);
    }
}
