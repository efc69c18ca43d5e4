//! 通用订阅内容识别
//!
//! 依次尝试：引擎原生配置、WireGuard 配置、通用 JSON、base64 编码的链接列表、明文链接列表。

use serde_json::Value;

use super::feeds::parse_shadowsocks_json;
use super::links::{decode_base64, parse_links};
use super::singbox::parse_config;
use super::wireguard::parse_wireguard_conf;
use crate::error::UpdateError;
use crate::models::{ConfigBean, ConfigKind, HysteriaBean, ProxyBean, ServerCommon};
use crate::utils::split_host_port;

/// 解析结果，部分条目失败时仍返回成功的部分
#[derive(Debug, Clone, Default)]
pub struct ParsedSubscription {
    pub beans: Vec<ProxyBean>,
    pub warnings: Vec<String>,
}

impl ParsedSubscription {
    fn new(beans: Vec<ProxyBean>, warnings: Vec<String>) -> Self {
        Self { beans, warnings }
    }
}

pub fn parse_raw(text: &str) -> Result<ParsedSubscription, UpdateError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(UpdateError::Empty);
    }

    if text.contains("\"outbounds\"") || text.contains("\"endpoints\"") {
        match serde_json::from_str::<Value>(text) {
            Ok(root) if root.is_object() => {
                let (beans, warnings) = parse_config(&root);
                if !beans.is_empty() {
                    return Ok(ParsedSubscription::new(beans, warnings));
                }
            }
            Ok(_) => {}
            Err(e) => log::warn!("Failed to parse subscription as engine config: {}", e),
        }
    } else if text.contains("[Interface]") {
        match parse_wireguard_conf(text) {
            Ok(beans) => return Ok(ParsedSubscription::new(beans, Vec::new())),
            Err(e) => log::warn!("Failed to parse subscription as WireGuard config: {}", e),
        }
    }

    if let Ok(json) = serde_json::from_str::<Value>(text) {
        let beans = parse_json(&json);
        if !beans.is_empty() {
            return Ok(ParsedSubscription::new(beans, Vec::new()));
        }
    }

    if let Some(decoded) = decode_base64(text) {
        let (beans, warnings) = parse_links(&decoded);
        if !beans.is_empty() {
            return Ok(ParsedSubscription::new(beans, warnings));
        }
    }

    let (beans, warnings) = parse_links(text);
    if beans.is_empty() {
        if let Some(first) = warnings.first() {
            return Err(UpdateError::Parse(first.clone()));
        }
        return Err(UpdateError::Empty);
    }
    Ok(ParsedSubscription::new(beans, warnings))
}

/// 通用 JSON：单个对象或对象数组
pub fn parse_json(json: &Value) -> Vec<ProxyBean> {
    match json {
        Value::Array(items) => items
            .iter()
            .filter(|item| item.is_object())
            .flat_map(parse_json)
            .collect(),
        Value::Object(map) => {
            let has = |key: &str| map.contains_key(key);
            if has("server") && (has("up") || has("up_mbps")) {
                return parse_hysteria_json(json).into_iter().collect();
            }
            if has("method") {
                return parse_shadowsocks_json(json).into_iter().collect();
            }
            if has("outbounds") {
                return vec![raw_config(json, ConfigKind::Full)];
            }
            if has("server") && has("server_port") {
                return vec![raw_config(json, ConfigKind::Outbound)];
            }
            if has("version") && has("servers") {
                return json["servers"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(parse_shadowsocks_json)
                    .collect();
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}

fn raw_config(json: &Value, kind: ConfigKind) -> ProxyBean {
    let name = json["tag"].as_str().unwrap_or_default();
    ProxyBean::Config(ConfigBean {
        common: ServerCommon::default().with_name(name),
        kind,
        config: serde_json::to_string_pretty(json).unwrap_or_default(),
    })
}

/// `100`、`"100 Mbps"` 都取前导数字
fn mbps(value: &Value) -> u32 {
    match value {
        Value::Number(n) => n.as_u64().map(|n| n as u32).unwrap_or(0),
        Value::String(s) => s
            .trim()
            .chars()
            .take_while(char::is_ascii_digit)
            .collect::<String>()
            .parse()
            .unwrap_or(0),
        _ => 0,
    }
}

/// hysteria 1 客户端配置，`server` 可带端口范围
fn parse_hysteria_json(json: &Value) -> Option<ProxyBean> {
    let server = json["server"].as_str()?;
    let (host, ports) = server.rsplit_once(':')?;
    let (port, server_ports) = match ports.parse::<u16>() {
        Ok(port) => (port, String::new()),
        Err(_) => {
            let first = ports.split([',', '-']).next()?.parse().ok()?;
            (first, ports.to_string())
        }
    };
    let host = split_host_port(&format!("{}:{}", host, port))
        .map(|(h, _)| h)
        .unwrap_or_else(|| host.to_string());
    let text = |key: &str| json[key].as_str().unwrap_or_default().to_string();

    Some(ProxyBean::Hysteria(HysteriaBean {
        common: ServerCommon::new(host, port),
        protocol_version: 1,
        auth_payload: text("auth_str"),
        obfuscation: text("obfs"),
        sni: text("server_name"),
        alpn: text("alpn"),
        allow_insecure: json["insecure"].as_bool().unwrap_or(false),
        upload_mbps: mbps(if json["up_mbps"].is_null() { &json["up"] } else { &json["up_mbps"] }),
        download_mbps: mbps(if json["down_mbps"].is_null() {
            &json["down"]
        } else {
            &json["down_mbps"]
        }),
        protocol: match text("protocol").as_str() {
            "" => "udp".to_string(),
            other => other.to_string(),
        },
        server_ports,
        hop_interval: String::new(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    const LINKS: &str = "trojan://pw@a.example.com:443#A\nvless://id@b.example.com:443#B";

    #[test]
    fn test_plain_and_base64_links() {
        let parsed = parse_raw(LINKS).unwrap();
        assert_eq!(parsed.beans.len(), 2);

        let parsed = parse_raw(&STANDARD.encode(LINKS)).unwrap();
        assert_eq!(parsed.beans.len(), 2);
        assert_eq!(parsed.beans[1].display_name(), "B");
    }

    #[test]
    fn test_engine_config() {
        let text = r#"{"outbounds":[{"type":"socks","tag":"s","server":"1.1.1.1","server_port":1080}]}"#;
        let parsed = parse_raw(text).unwrap();
        assert_eq!(parsed.beans.len(), 1);
        assert_eq!(parsed.beans[0].type_name(), "socks");
    }

    #[test]
    fn test_full_config_without_proxies() {
        // 没有可识别的 outbound 时整体作为原始配置
        let text = r#"{"outbounds":[{"type":"direct","tag":"direct"}]}"#;
        let parsed = parse_raw(text).unwrap();
        let ProxyBean::Config(bean) = &parsed.beans[0] else {
            panic!("expected config");
        };
        assert_eq!(bean.kind, ConfigKind::Full);
    }

    #[test]
    fn test_generic_json() {
        let beans = parse_json(&serde_json::json!([
            {"server": "1.2.3.4", "server_port": 8388, "method": "aes-128-gcm", "password": "x"},
            {"type": "vless", "tag": "raw", "server": "a.com", "server_port": 443},
            {"server": "h.example.com:20000-30000", "up_mbps": 10, "down": "100 Mbps",
             "protocol": "wechat-video"},
            "ignored"
        ]));
        assert_eq!(beans.len(), 3);
        assert_eq!(beans[0].type_name(), "shadowsocks");

        let ProxyBean::Config(raw) = &beans[1] else {
            panic!("expected config");
        };
        assert_eq!(raw.kind, ConfigKind::Outbound);
        assert_eq!(raw.common.name, "raw");

        let ProxyBean::Hysteria(hy) = &beans[2] else {
            panic!("expected hysteria");
        };
        assert_eq!(hy.common.server_port, 20000);
        assert_eq!(hy.server_ports, "20000-30000");
        assert_eq!(hy.download_mbps, 100);
        assert!(!hy.can_use_engine());
    }

    #[test]
    fn test_wireguard_conf() {
        let conf = "[Interface]\nAddress = 10.0.0.2/32\nPrivateKey = k\n[Peer]\nPublicKey = p\nEndpoint = 1.2.3.4:51820\n";
        let parsed = parse_raw(conf).unwrap();
        assert_eq!(parsed.beans[0].type_name(), "wireguard");
    }

    #[test]
    fn test_empty_and_garbage() {
        assert!(matches!(parse_raw("  "), Err(UpdateError::Empty)));
        assert!(matches!(parse_raw("hello world"), Err(UpdateError::Empty)));
        assert!(matches!(parse_raw("vmess://%%%"), Err(UpdateError::Parse(_))));
    }
}
