//! Default download mirrors, keyed by CPU architecture.

/// Mirror tag for a Rust `std::env::consts::ARCH` value.
pub fn arch_tag(arch: &str) -> &'static str {
    match arch {
        "aarch64" | "arm64" => "arm64",
        "s390x" => "s390x",
        _ => "amd64",
    }
}

/// Backend executable mirrors, highest priority first. Override with `BACKEND_URLS`.
///
/// The official release is a zip archive; the executable is extracted from it.
pub fn default_backend_sources(arch: &str) -> Vec<String> {
    let tag = arch_tag(arch);
    let release = match tag {
        "arm64" => "Xray-linux-arm64-v8a.zip",
        "s390x" => "Xray-linux-s390x.zip",
        _ => "Xray-linux-64.zip",
    };
    vec![
        format!("https://github.com/XTLS/Xray-core/releases/latest/download/{release}"),
        format!("https://{tag}.ssss.nyc.mn/web"),
    ]
}

/// Tunnel executable mirrors, highest priority first.
pub fn default_tunnel_sources(arch: &str) -> Vec<String> {
    let tag = arch_tag(arch);
    let release = match tag {
        "arm64" => "cloudflared-linux-arm64",
        "s390x" => "cloudflared-linux-s390x",
        _ => "cloudflared-linux-amd64",
    };
    vec![
        format!("https://{tag}.ssss.nyc.mn/bot"),
        format!("https://github.com/cloudflare/cloudflared/releases/latest/download/{release}"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_arch_falls_back_to_amd64() {
        assert_eq!(arch_tag("x86_64"), "amd64");
        assert_eq!(arch_tag("riscv64"), "amd64");
        assert_eq!(arch_tag("aarch64"), "arm64");
    }

    #[test]
    fn official_backend_release_comes_first() {
        let sources = default_backend_sources("x86_64");
        assert_eq!(
            sources[0],
            "https://github.com/XTLS/Xray-core/releases/latest/download/Xray-linux-64.zip"
        );
        assert!(default_backend_sources("aarch64")[0].ends_with("Xray-linux-arm64-v8a.zip"));
    }

    #[test]
    fn every_default_source_is_https() {
        for arch in ["x86_64", "aarch64"] {
            let all = default_backend_sources(arch)
                .into_iter()
                .chain(default_tunnel_sources(arch));
            for url in all {
                assert!(url.starts_with("https://"), "{url}");
            }
        }
    }
}
