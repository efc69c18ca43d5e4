//! 单个节点到引擎 outbound 的转换

use serde_json::Value;

use crate::error::BuildError;
use crate::models::options::{
    AnyTlsOutbound, Empty, HttpOutbound, Hysteria2Obfs, Hysteria2Outbound, HysteriaOutbound,
    OutboundBody, OutboundKind, OutboundTls, RealityOptions, ShadowTlsOutbound,
    ShadowsocksOutbound, SocksOutbound, SshOutbound, TransportOptions, TrojanOutbound,
    TuicOutbound, UtlsOptions, VLessOutbound, VMessOutbound, WireGuardEndpoint, WireGuardPeer,
};
use crate::models::{
    ConfigKind, HysteriaBean, ProxyBean, StreamSettings, WireGuardBean,
};
use crate::utils::list_by_line_or_comma;

fn non_empty(value: &str) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn alpn_list(alpn: &str) -> Option<Vec<String>> {
    let list = list_by_line_or_comma(alpn);
    if list.is_empty() {
        None
    } else {
        Some(list)
    }
}

/// 普通 TLS 参数
fn simple_tls(sni: &str, alpn: &str, insecure: bool) -> OutboundTls {
    OutboundTls {
        enabled: true,
        server_name: non_empty(sni),
        insecure: insecure.then_some(true),
        alpn: alpn_list(alpn),
        ..Default::default()
    }
}

/// v2ray 系协议的 TLS / Reality 参数
fn stream_tls(stream: &StreamSettings) -> Option<OutboundTls> {
    if !stream.tls_enabled() {
        return None;
    }
    let mut tls = simple_tls(&stream.sni, &stream.alpn, stream.allow_insecure);
    let mut fingerprint = stream.utls_fingerprint.clone();
    if !stream.reality_public_key.is_empty() {
        tls.reality = Some(RealityOptions {
            enabled: true,
            public_key: stream.reality_public_key.clone(),
            short_id: stream.reality_short_id.clone(),
        });
        // Reality 需要 uTLS
        if fingerprint.is_empty() {
            fingerprint = "chrome".to_string();
        }
    }
    if !fingerprint.is_empty() {
        tls.utls = Some(UtlsOptions {
            enabled: true,
            fingerprint,
        });
    }
    Some(tls)
}

fn stream_transport(stream: &StreamSettings) -> Option<TransportOptions> {
    match stream.network.as_str() {
        "ws" => {
            let mut headers = std::collections::BTreeMap::new();
            if let Some(host) = list_by_line_or_comma(&stream.host).into_iter().next() {
                headers.insert("Host".to_string(), host);
            }
            Some(TransportOptions::Ws {
                path: if stream.path.is_empty() {
                    "/".to_string()
                } else {
                    stream.path.clone()
                },
                headers,
            })
        }
        "http" | "h2" => Some(TransportOptions::Http {
            host: list_by_line_or_comma(&stream.host),
            path: if stream.path.is_empty() {
                "/".to_string()
            } else {
                stream.path.clone()
            },
        }),
        "grpc" => Some(TransportOptions::Grpc {
            service_name: stream.path.clone(),
        }),
        "httpupgrade" => Some(TransportOptions::HttpUpgrade {
            host: list_by_line_or_comma(&stream.host)
                .into_iter()
                .next()
                .unwrap_or_default(),
            path: stream.path.clone(),
        }),
        "quic" => Some(TransportOptions::Quic {}),
        _ => None,
    }
}

/// `1000-2000,3000` → `["1000:2000", "3000:3000"]`
fn hop_ports(raw: &str) -> Option<Vec<String>> {
    let ports: Vec<String> = list_by_line_or_comma(raw)
        .into_iter()
        .map(|range| match range.split_once(['-', ':']) {
            Some((start, end)) => format!("{}:{}", start.trim(), end.trim()),
            None => format!("{}:{}", range, range),
        })
        .collect();
    if ports.is_empty() {
        None
    } else {
        Some(ports)
    }
}

fn build_hysteria(bean: &HysteriaBean) -> OutboundKind {
    let server = bean.common.server_address.clone();
    let server_port = bean.common.server_port;
    let tls = simple_tls(&bean.sni, &bean.alpn, bean.allow_insecure);
    if bean.protocol_version == 1 {
        OutboundKind::Hysteria(HysteriaOutbound {
            server,
            server_port,
            auth_str: non_empty(&bean.auth_payload),
            obfs: non_empty(&bean.obfuscation),
            up_mbps: bean.upload_mbps,
            down_mbps: bean.download_mbps,
            server_ports: hop_ports(&bean.server_ports),
            hop_interval: non_empty(&bean.hop_interval),
            tls,
        })
    } else {
        OutboundKind::Hysteria2(Hysteria2Outbound {
            server,
            server_port,
            password: non_empty(&bean.auth_payload),
            obfs: non_empty(&bean.obfuscation).map(|password| Hysteria2Obfs {
                kind: "salamander".to_string(),
                password,
            }),
            up_mbps: (bean.upload_mbps > 0).then_some(bean.upload_mbps),
            down_mbps: (bean.download_mbps > 0).then_some(bean.download_mbps),
            server_ports: hop_ports(&bean.server_ports),
            hop_interval: non_empty(&bean.hop_interval),
            tls,
        })
    }
}

/// `1,2,3` → `[1, 2, 3]`，格式不对时忽略
fn parse_reserved(raw: &str) -> Option<Vec<u8>> {
    let parts = list_by_line_or_comma(raw);
    if parts.len() != 3 {
        return None;
    }
    parts.iter().map(|p| p.parse::<u8>().ok()).collect()
}

fn build_wireguard(bean: &WireGuardBean) -> OutboundKind {
    OutboundKind::WireGuard(WireGuardEndpoint {
        address: list_by_line_or_comma(&bean.local_address),
        private_key: bean.private_key.clone(),
        mtu: bean.mtu,
        peers: vec![WireGuardPeer {
            address: bean.common.server_address.clone(),
            port: bean.common.server_port,
            public_key: bean.peer_public_key.clone(),
            pre_shared_key: non_empty(&bean.peer_pre_shared_key),
            allowed_ips: vec!["0.0.0.0/0".to_string(), "::/0".to_string()],
            reserved: parse_reserved(&bean.reserved),
        }],
    })
}

/// 把一个节点转换为引擎 outbound 主体
///
/// 链、集合、完整配置与需要外部插件的协议不能直接作为一跳。
pub fn build_hop(id: i64, bean: &ProxyBean) -> Result<OutboundBody, BuildError> {
    let server = bean.common().server_address.clone();
    let server_port = bean.common().server_port;

    let kind = match bean {
        ProxyBean::Socks(b) => OutboundKind::Socks(SocksOutbound {
            server,
            server_port,
            version: non_empty(&b.protocol),
            username: non_empty(&b.username),
            password: non_empty(&b.password),
        }),
        ProxyBean::Http(b) => OutboundKind::Http(HttpOutbound {
            server,
            server_port,
            username: non_empty(&b.username),
            password: non_empty(&b.password),
            path: non_empty(&b.path),
            tls: b.tls.then(|| simple_tls(&b.sni, "", b.allow_insecure)),
        }),
        ProxyBean::Shadowsocks(b) => {
            let (plugin, plugin_opts) = match b.plugin.split_once(';') {
                Some((name, opts)) => (non_empty(name), non_empty(opts)),
                None => (non_empty(&b.plugin), None),
            };
            OutboundKind::Shadowsocks(ShadowsocksOutbound {
                server,
                server_port,
                method: b.method.clone(),
                password: b.password.clone(),
                plugin,
                plugin_opts,
            })
        }
        ProxyBean::Vmess(b) => OutboundKind::Vmess(VMessOutbound {
            server,
            server_port,
            uuid: b.uuid.clone(),
            security: non_empty(&b.security).unwrap_or_else(|| "auto".to_string()),
            alter_id: b.alter_id,
            tls: stream_tls(&b.stream),
            transport: stream_transport(&b.stream),
        }),
        ProxyBean::Vless(b) => OutboundKind::Vless(VLessOutbound {
            server,
            server_port,
            uuid: b.uuid.clone(),
            flow: non_empty(&b.flow),
            tls: stream_tls(&b.stream),
            transport: stream_transport(&b.stream),
        }),
        ProxyBean::Trojan(b) => OutboundKind::Trojan(TrojanOutbound {
            server,
            server_port,
            password: b.password.clone(),
            tls: stream_tls(&b.stream),
            transport: stream_transport(&b.stream),
        }),
        ProxyBean::Hysteria(b) if b.can_use_engine() => build_hysteria(b),
        ProxyBean::Tuic(b) => OutboundKind::Tuic(TuicOutbound {
            server,
            server_port,
            uuid: b.uuid.clone(),
            password: b.token.clone(),
            congestion_control: non_empty(&b.congestion_control),
            udp_relay_mode: non_empty(&b.udp_relay_mode),
            zero_rtt_handshake: b.zero_rtt,
            tls: simple_tls(&b.sni, &b.alpn, b.allow_insecure),
        }),
        ProxyBean::Ssh(b) => {
            let host_key: Vec<String> = b
                .public_key
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            OutboundKind::Ssh(SshOutbound {
                server,
                server_port,
                user: b.username.clone(),
                password: non_empty(&b.password),
                private_key: non_empty(&b.private_key),
                private_key_passphrase: non_empty(&b.private_key_passphrase),
                host_key: (!host_key.is_empty()).then_some(host_key),
            })
        }
        ProxyBean::ShadowTls(b) => OutboundKind::ShadowTls(ShadowTlsOutbound {
            server,
            server_port,
            version: if b.version == 0 { 3 } else { b.version },
            password: b.password.clone(),
            tls: simple_tls(&b.sni, &b.alpn, b.allow_insecure),
        }),
        ProxyBean::AnyTls(b) => OutboundKind::AnyTls(AnyTlsOutbound {
            server,
            server_port,
            password: b.password.clone(),
            tls: simple_tls(&b.sni, &b.alpn, b.allow_insecure),
        }),
        ProxyBean::WireGuard(b) => build_wireguard(b),
        ProxyBean::Direct(_) => OutboundKind::Direct(Empty {}),
        ProxyBean::Config(b) if b.kind == ConfigKind::Outbound => {
            let value: Value = serde_json::from_str(&b.config)
                .map_err(|source| BuildError::InvalidCustomJson { id, source })?;
            return match value {
                Value::Object(map) => Ok(OutboundBody::Raw(map)),
                _ => Err(BuildError::InvalidConfig(format!(
                    "outbound config of profile {} is not a JSON object",
                    id
                ))),
            };
        }
        other => {
            return Err(BuildError::InvalidConfig(format!(
                "profile {} ({}) can not be used as an outbound",
                id,
                other.type_name()
            )))
        }
    };
    Ok(kind.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::options::Outbound;
    use crate::models::{
        ChainBean, ConfigBean, NaiveBean, ServerCommon, ShadowsocksBean, VLessBean,
    };
    use serde_json::json;

    fn to_json(bean: &ProxyBean) -> Value {
        Outbound::new("t", build_hop(1, bean).unwrap()).to_value().unwrap()
    }

    #[test]
    fn test_shadowsocks_plugin() {
        let bean = ProxyBean::Shadowsocks(ShadowsocksBean {
            common: ServerCommon::new("1.2.3.4", 8388),
            method: "aes-256-gcm".to_string(),
            password: "pw".to_string(),
            plugin: "obfs-local;obfs=http;obfs-host=a.com".to_string(),
            ..Default::default()
        });
        let value = to_json(&bean);
        assert_eq!(value["type"], "shadowsocks");
        assert_eq!(value["plugin"], "obfs-local");
        assert_eq!(value["plugin_opts"], "obfs=http;obfs-host=a.com");
        assert_eq!(value["server_port"], 8388);
    }

    #[test]
    fn test_vless_reality() {
        let mut bean = VLessBean {
            common: ServerCommon::new("a.com", 443),
            uuid: "u".to_string(),
            flow: "xtls-rprx-vision".to_string(),
            ..Default::default()
        };
        bean.stream.security = "reality".to_string();
        bean.stream.sni = "www.apple.com".to_string();
        bean.stream.reality_public_key = "pk".to_string();
        bean.stream.network = "grpc".to_string();
        bean.stream.path = "svc".to_string();

        let value = to_json(&ProxyBean::Vless(bean));
        assert_eq!(value["tls"]["server_name"], "www.apple.com");
        assert_eq!(value["tls"]["reality"]["public_key"], "pk");
        assert_eq!(value["tls"]["utls"]["fingerprint"], "chrome");
        assert_eq!(value["transport"], json!({"type": "grpc", "service_name": "svc"}));
    }

    #[test]
    fn test_hysteria2_ports() {
        let bean = ProxyBean::Hysteria(HysteriaBean {
            common: ServerCommon::new("h.com", 443),
            auth_payload: "secret".to_string(),
            obfuscation: "obfs".to_string(),
            server_ports: "1000-2000,3000".to_string(),
            ..Default::default()
        });
        let value = to_json(&bean);
        assert_eq!(value["type"], "hysteria2");
        assert_eq!(value["password"], "secret");
        assert_eq!(value["obfs"]["type"], "salamander");
        assert_eq!(value["server_ports"], json!(["1000:2000", "3000:3000"]));
        assert_eq!(value["tls"]["enabled"], true);
    }

    #[test]
    fn test_wireguard_reserved() {
        let bean = ProxyBean::WireGuard(WireGuardBean {
            common: ServerCommon::new("wg.com", 51820),
            local_address: "10.0.0.2/32\nfd00::2/128".to_string(),
            private_key: "k".to_string(),
            peer_public_key: "p".to_string(),
            reserved: "1,2,3".to_string(),
            ..Default::default()
        });
        let value = to_json(&bean);
        assert_eq!(value["type"], "wireguard");
        assert_eq!(value["address"], json!(["10.0.0.2/32", "fd00::2/128"]));
        assert_eq!(value["peers"][0]["reserved"], json!([1, 2, 3]));
        assert_eq!(value["mtu"], 1420);
    }

    #[test]
    fn test_raw_outbound_config() {
        let bean = ProxyBean::Config(ConfigBean {
            kind: ConfigKind::Outbound,
            config: r#"{"type": "vmess", "server": "r.com"}"#.to_string(),
            ..Default::default()
        });
        let value = to_json(&bean);
        assert_eq!(value["server"], "r.com");

        let broken = ProxyBean::Config(ConfigBean {
            kind: ConfigKind::Outbound,
            config: "{".to_string(),
            ..Default::default()
        });
        assert!(matches!(
            build_hop(9, &broken),
            Err(BuildError::InvalidCustomJson { id: 9, .. })
        ));
    }

    #[test]
    fn test_composite_and_external_rejected() {
        assert!(build_hop(1, &ProxyBean::Chain(ChainBean::default())).is_err());
        assert!(build_hop(1, &ProxyBean::Naive(NaiveBean::default())).is_err());
    }
}
