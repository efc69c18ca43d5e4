//! 引擎原生 outbound / endpoint JSON 转为节点

use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::models::{
    AnyTlsBean, HttpBean, HysteriaBean, ProxyBean, ServerCommon, ShadowsocksBean, SocksBean,
    SshBean, StreamSettings, TrojanBean, TuicBean, VLessBean, VMessBean, WireGuardBean,
};
use crate::utils::is_ip_address;

fn text(value: &Value, key: &str) -> String {
    match &value[key] {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn flag(value: &Value, key: &str) -> bool {
    value[key].as_bool().unwrap_or(false)
}

fn number(value: &Value, key: &str) -> u32 {
    value[key]
        .as_u64()
        .or_else(|| value[key].as_str().and_then(|s| s.parse().ok()))
        .map(|n| n as u32)
        .unwrap_or(0)
}

/// 字符串或字符串数组，数组按分隔符拼接
fn listable(value: &Value, key: &str, separator: &str) -> String {
    match &value[key] {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(separator),
        Value::String(s) => s.clone(),
        _ => String::new(),
    }
}

fn common(value: &Value) -> Result<ServerCommon> {
    let server = text(value, "server");
    if server.is_empty() {
        return Err(anyhow!("missing server"));
    }
    let port = value["server_port"]
        .as_u64()
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| anyhow!("missing server_port"))?;
    Ok(ServerCommon::new(server, port).with_name(text(value, "tag")))
}

/// tls 与 transport 两个对象合成流设置
fn stream(value: &Value) -> StreamSettings {
    let tls = &value["tls"];
    let transport = &value["transport"];
    let mut stream = StreamSettings {
        network: match text(transport, "type").as_str() {
            "" => "tcp".to_string(),
            other => other.to_string(),
        },
        host: listable(transport, "host", ","),
        path: text(transport, "path"),
        sni: text(tls, "server_name"),
        alpn: listable(tls, "alpn", ","),
        allow_insecure: flag(tls, "insecure"),
        utls_fingerprint: text(&tls["utls"], "fingerprint"),
        reality_public_key: text(&tls["reality"], "public_key"),
        reality_short_id: text(&tls["reality"], "short_id"),
        ..Default::default()
    };
    if flag(tls, "enabled") {
        stream.security = if flag(&tls["reality"], "enabled") {
            "reality".to_string()
        } else {
            "tls".to_string()
        };
    }
    match stream.network.as_str() {
        "grpc" => stream.path = text(transport, "service_name"),
        "ws" if stream.host.is_empty() => {
            stream.host = text(&transport["headers"], "Host");
        }
        _ => {}
    }
    stream
}

/// 解析单个 outbound 或 endpoint，不支持的类型返回 None
pub fn parse_outbound(value: &Value) -> Result<Option<ProxyBean>> {
    let bean = match text(value, "type").as_str() {
        "socks" => ProxyBean::Socks(SocksBean {
            common: common(value)?,
            protocol: match text(value, "version").as_str() {
                "" => "5".to_string(),
                other => other.to_string(),
            },
            username: text(value, "username"),
            password: text(value, "password"),
            udp_over_tcp: flag(value, "udp_over_tcp"),
        }),
        "http" => ProxyBean::Http(HttpBean {
            common: common(value)?,
            username: text(value, "username"),
            password: text(value, "password"),
            tls: flag(&value["tls"], "enabled"),
            sni: text(&value["tls"], "server_name"),
            allow_insecure: flag(&value["tls"], "insecure"),
            path: text(value, "path"),
        }),
        "shadowsocks" => {
            let plugin = text(value, "plugin");
            let opts = text(value, "plugin_opts");
            ProxyBean::Shadowsocks(ShadowsocksBean {
                common: common(value)?,
                method: text(value, "method"),
                password: text(value, "password"),
                plugin: if opts.is_empty() {
                    plugin
                } else {
                    format!("{};{}", plugin, opts)
                },
                udp_over_tcp: flag(value, "udp_over_tcp"),
            })
        }
        "vmess" => ProxyBean::Vmess(VMessBean {
            common: common(value)?,
            uuid: text(value, "uuid"),
            alter_id: number(value, "alter_id"),
            security: match text(value, "security").as_str() {
                "" => "auto".to_string(),
                other => other.to_string(),
            },
            stream: stream(value),
        }),
        "vless" => ProxyBean::Vless(VLessBean {
            common: common(value)?,
            uuid: text(value, "uuid"),
            flow: text(value, "flow"),
            stream: stream(value),
        }),
        "trojan" => ProxyBean::Trojan(TrojanBean {
            common: common(value)?,
            password: text(value, "password"),
            stream: stream(value),
        }),
        "hysteria" => ProxyBean::Hysteria(HysteriaBean {
            common: common(value)?,
            protocol_version: 1,
            auth_payload: text(value, "auth_str"),
            obfuscation: text(value, "obfs"),
            sni: text(&value["tls"], "server_name"),
            alpn: listable(&value["tls"], "alpn", ","),
            allow_insecure: flag(&value["tls"], "insecure"),
            upload_mbps: number(value, "up_mbps"),
            download_mbps: number(value, "down_mbps"),
            ..Default::default()
        }),
        "hysteria2" => ProxyBean::Hysteria(HysteriaBean {
            common: common(value)?,
            protocol_version: 2,
            auth_payload: text(value, "password"),
            obfuscation: text(&value["obfs"], "password"),
            sni: text(&value["tls"], "server_name"),
            alpn: listable(&value["tls"], "alpn", ","),
            allow_insecure: flag(&value["tls"], "insecure"),
            upload_mbps: number(value, "up_mbps"),
            download_mbps: number(value, "down_mbps"),
            server_ports: listable(value, "server_ports", ","),
            hop_interval: text(value, "hop_interval"),
            ..Default::default()
        }),
        "tuic" => ProxyBean::Tuic(TuicBean {
            common: common(value)?,
            uuid: text(value, "uuid"),
            token: text(value, "password"),
            congestion_control: text(value, "congestion_control"),
            udp_relay_mode: text(value, "udp_relay_mode"),
            alpn: listable(&value["tls"], "alpn", ","),
            sni: text(&value["tls"], "server_name"),
            allow_insecure: flag(&value["tls"], "insecure"),
            zero_rtt: flag(value, "zero_rtt_handshake"),
        }),
        "anytls" => ProxyBean::AnyTls(AnyTlsBean {
            common: common(value)?,
            password: text(value, "password"),
            sni: text(&value["tls"], "server_name"),
            alpn: listable(&value["tls"], "alpn", ","),
            allow_insecure: flag(&value["tls"], "insecure"),
        }),
        "ssh" => ProxyBean::Ssh(SshBean {
            common: common(value)?,
            username: text(value, "user"),
            password: text(value, "password"),
            private_key: listable(value, "private_key", "\n"),
            private_key_passphrase: text(value, "private_key_passphrase"),
            public_key: listable(value, "host_key", "\n"),
        }),
        "wireguard" => return parse_wireguard(value).map(|beans| beans.into_iter().next()),
        _ => return Ok(None),
    };
    Ok(Some(bean))
}

/// wireguard 有旧版 outbound 和新版 endpoint 两种写法，endpoint 每个 peer 一个节点
pub fn parse_wireguard(value: &Value) -> Result<Vec<ProxyBean>> {
    let local_address = listable(value, "local_address", "\n");
    let local_address = if local_address.is_empty() {
        listable(value, "address", "\n")
    } else {
        local_address
    };
    let template = WireGuardBean {
        common: ServerCommon::default().with_name(text(value, "tag")),
        local_address,
        private_key: text(value, "private_key"),
        mtu: match number(value, "mtu") {
            0 => 1408,
            mtu => mtu,
        },
        ..Default::default()
    };

    let reserved = |v: &Value| match &v["reserved"] {
        Value::Array(items) => items
            .iter()
            .map(|i| i.to_string().trim_matches('"').to_string())
            .collect::<Vec<_>>()
            .join(","),
        Value::String(s) => s.clone(),
        _ => String::new(),
    };

    if let Some(peers) = value["peers"].as_array() {
        let mut beans = Vec::new();
        for peer in peers {
            let address = text(peer, "address");
            let Some(port) = peer["port"].as_u64().and_then(|p| u16::try_from(p).ok()) else {
                continue;
            };
            if address.is_empty() {
                continue;
            }
            let mut bean = template.clone();
            bean.common.server_address = address;
            bean.common.server_port = port;
            bean.peer_public_key = text(peer, "public_key");
            bean.peer_pre_shared_key = text(peer, "pre_shared_key");
            bean.reserved = reserved(peer);
            beans.push(ProxyBean::WireGuard(bean));
        }
        return Ok(beans);
    }

    let mut bean = template;
    let server = common(value)?;
    bean.common.server_address = server.server_address;
    bean.common.server_port = server.server_port;
    bean.peer_public_key = text(value, "peer_public_key");
    bean.peer_pre_shared_key = text(value, "pre_shared_key");
    bean.reserved = reserved(value);
    Ok(vec![ProxyBean::WireGuard(bean)])
}

/// 解析完整配置中的 `outbounds` 与 `endpoints`，跳过无法识别的项
pub fn parse_config(root: &Value) -> (Vec<ProxyBean>, Vec<String>) {
    let mut beans: Vec<ProxyBean> = Vec::new();
    let mut warnings = Vec::new();

    let outbounds = root["outbounds"].as_array().into_iter().flatten();
    let endpoints = root["endpoints"].as_array().into_iter().flatten();
    for item in outbounds.chain(endpoints) {
        let kind = text(item, "type");
        let result = if kind == "wireguard" {
            parse_wireguard(item)
        } else {
            parse_outbound(item).map(|bean| bean.into_iter().collect())
        };
        match result {
            Ok(parsed) => beans.extend(parsed),
            Err(e) => {
                let tag = text(item, "tag");
                log::warn!("Failed to parse {} outbound {}: {}", kind, tag, e);
                warnings.push(format!("{}: {}", tag, e));
            }
        }
    }

    for bean in &mut beans {
        fill_sni_from_host(bean);
    }
    (beans, warnings)
}

/// v2ray 系节点启用 TLS 但没写 server_name 时，用伪装域名作为 SNI
fn fill_sni_from_host(bean: &mut ProxyBean) {
    let stream = match bean {
        ProxyBean::Vmess(b) => &mut b.stream,
        ProxyBean::Vless(b) => &mut b.stream,
        ProxyBean::Trojan(b) => &mut b.stream,
        _ => return,
    };
    if stream.tls_enabled() && stream.sni.is_empty() {
        let host = stream.host.split(',').map(str::trim).find(|h| !h.is_empty());
        if let Some(host) = host.filter(|h| !is_ip_address(h)) {
            stream.sni = host.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_config_outbounds() {
        let root = json!({
            "outbounds": [
                {"type": "direct", "tag": "direct"},
                {
                    "type": "shadowsocks", "tag": "ss", "server": "1.2.3.4", "server_port": 8388,
                    "method": "aes-256-gcm", "password": "pw",
                    "plugin": "obfs-local", "plugin_opts": "obfs=http"
                },
                {
                    "type": "vless", "tag": "ws", "server": "a.com", "server_port": 443,
                    "uuid": "id", "tls": {"enabled": true},
                    "transport": {"type": "ws", "path": "/p", "headers": {"Host": "cdn.a.com"}}
                },
                {"type": "trojan", "tag": "broken", "server": "b.com"}
            ]
        });
        let (beans, warnings) = parse_config(&root);
        assert_eq!(beans.len(), 2);
        assert_eq!(warnings.len(), 1);

        let ProxyBean::Shadowsocks(ss) = &beans[0] else {
            panic!("expected shadowsocks");
        };
        assert_eq!(ss.common.name, "ss");
        assert_eq!(ss.plugin, "obfs-local;obfs=http");

        let ProxyBean::Vless(vless) = &beans[1] else {
            panic!("expected vless");
        };
        assert_eq!(vless.stream.security, "tls");
        assert_eq!(vless.stream.host, "cdn.a.com");
        assert_eq!(vless.stream.sni, "cdn.a.com");
    }

    #[test]
    fn test_wireguard_endpoint_peers() {
        let root = json!({
            "endpoints": [{
                "type": "wireguard", "tag": "wg",
                "address": ["10.0.0.2/32", "fd00::2/128"],
                "private_key": "PRIV",
                "peers": [
                    {"address": "1.1.1.1", "port": 51820, "public_key": "A", "reserved": [1, 2, 3]},
                    {"address": "2.2.2.2", "port": 51820, "public_key": "B"},
                    {"public_key": "C"}
                ]
            }]
        });
        let (beans, _) = parse_config(&root);
        assert_eq!(beans.len(), 2);
        let ProxyBean::WireGuard(first) = &beans[0] else {
            panic!("expected wireguard");
        };
        assert_eq!(first.local_address, "10.0.0.2/32\nfd00::2/128");
        assert_eq!(first.mtu, 1408);
        assert_eq!(first.reserved, "1,2,3");
        assert_eq!(first.peer_public_key, "A");
    }

    #[test]
    fn test_unknown_type_skipped() {
        let value = json!({"type": "selector", "outbounds": ["a"]});
        assert!(parse_outbound(&value).unwrap().is_none());
    }
}
