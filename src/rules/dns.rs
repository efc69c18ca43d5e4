use url::Url;

use crate::error::BuildError;
use crate::models::options::{
    DnsServer, DnsServerKind, DomainResolver, LocalDns, RemoteDns, TlsEnabled,
};

/// 系统 DNS
pub const LOCAL_DNS_SERVER: &str = "local";

/// 把 DNS 链接转换为 DNS 服务器
///
/// 支持 `local`、`udp://`、`tcp://`、`tls://`、`quic://`、`https://`、`h3://`（`http3://` 视同 `h3`），
/// 不带 scheme 的地址按 UDP 处理。
pub fn build_dns_server(
    link: &str,
    detour: Option<&str>,
    tag: &str,
    resolver: Option<DomainResolver>,
) -> Result<DnsServer, BuildError> {
    let link = link.trim();
    if link == LOCAL_DNS_SERVER {
        return Ok(DnsServer {
            tag: tag.to_string(),
            kind: DnsServerKind::Local(LocalDns {}),
        });
    }

    let url = if link.contains("://") {
        Url::parse(link)
    } else {
        Url::parse(&format!("udp://{}", link))
    }
    .map_err(|e| BuildError::InvalidConfig(format!("invalid DNS server '{}': {}", link, e)))?;

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| BuildError::InvalidConfig(format!("DNS server '{}' has no host", link)))?;

    let mut remote = RemoteDns {
        server: host.trim_start_matches('[').trim_end_matches(']').to_string(),
        server_port: url.port(),
        detour: detour.map(str::to_string),
        domain_resolver: resolver,
        ..Default::default()
    };

    let kind = match url.scheme() {
        "tls" => {
            remote.tls = Some(TlsEnabled { enabled: true });
            DnsServerKind::Tls(remote)
        }
        "quic" => {
            remote.tls = Some(TlsEnabled { enabled: true });
            DnsServerKind::Quic(remote)
        }
        scheme @ ("https" | "h3" | "http3") => {
            remote.tls = Some(TlsEnabled { enabled: true });
            let path = url.path();
            if !path.is_empty() && path != "/" {
                remote.path = Some(path.to_string());
            }
            if scheme == "https" {
                DnsServerKind::Https(remote)
            } else {
                DnsServerKind::H3(remote)
            }
        }
        "tcp" => DnsServerKind::Tcp(remote),
        _ => DnsServerKind::Udp(remote),
    };

    Ok(DnsServer {
        tag: tag.to_string(),
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_local() {
        let server = build_dns_server("local", Some("direct"), "dns-local", None).unwrap();
        assert_eq!(server.type_name(), "local");
        assert_eq!(server.tag, "dns-local");
    }

    #[test]
    fn test_plain_address_is_udp() {
        let server = build_dns_server("8.8.8.8", Some("direct"), "dns-direct", None).unwrap();
        assert_eq!(
            serde_json::to_value(&server).unwrap(),
            json!({"tag": "dns-direct", "type": "udp", "server": "8.8.8.8", "detour": "direct"})
        );

        let server = build_dns_server("1.1.1.1:5353", None, "x", None).unwrap();
        assert_eq!(server.remote().unwrap().server_port, Some(5353));
    }

    #[test]
    fn test_https_with_path() {
        let resolver = DomainResolver {
            server: "dns-local".to_string(),
            strategy: None,
        };
        let server = build_dns_server(
            "https://dns.google/dns-query",
            None,
            "dns-remote",
            Some(resolver),
        )
        .unwrap();
        assert_eq!(server.type_name(), "https");
        let remote = server.remote().unwrap();
        assert_eq!(remote.server, "dns.google");
        assert_eq!(remote.path.as_deref(), Some("/dns-query"));
        assert_eq!(remote.server_port, None);
        assert!(remote.tls.is_some());
        assert_eq!(remote.domain_resolver.as_ref().unwrap().server, "dns-local");
    }

    #[test]
    fn test_http3_maps_to_h3() {
        let server = build_dns_server("http3://1.1.1.1/dns-query", None, "t", None).unwrap();
        assert_eq!(server.type_name(), "h3");

        let server = build_dns_server("tls://1.1.1.1:853", None, "t", None).unwrap();
        assert_eq!(server.type_name(), "tls");
        assert_eq!(server.remote().unwrap().server_port, Some(853));

        let server = build_dns_server("tcp://[2001:4860:4860::8888]", None, "t", None).unwrap();
        assert_eq!(server.type_name(), "tcp");
        assert_eq!(server.remote().unwrap().server, "2001:4860:4860::8888");
    }

    #[test]
    fn test_invalid_link() {
        assert!(build_dns_server("https://", None, "t", None).is_err());
    }
}
