//! 分享链接解析

use anyhow::{anyhow, Result};
use base64::{
    engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD},
    Engine as _,
};
use std::collections::HashMap;
use url::Url;

use crate::models::{
    AnyTlsBean, HttpBean, HysteriaBean, JuicityBean, MieruBean, NaiveBean, ProxyBean,
    ServerCommon, ShadowsocksBean, SocksBean, SshBean, StreamSettings, TrojanBean, TuicBean,
    VLessBean, VMessBean,
};
use crate::utils::{split_host_port, unwrap_ipv6_host};

/// 支持的链接前缀
const SCHEMES: &[&str] = &[
    "ss", "vmess", "vless", "trojan", "socks", "socks4", "socks4a", "socks5", "http", "https",
    "naive+https", "naive+quic", "hysteria", "hysteria2", "hy2", "tuic", "juicity", "mierus",
    "anytls", "ssh",
];

/// 宽松的 base64 解码，兼容标准与 URL 字母表、有无填充
pub fn decode_base64(text: &str) -> Option<String> {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .trim_end_matches('=')
        .to_string();
    if cleaned.is_empty() {
        return None;
    }
    let bytes = STANDARD_NO_PAD
        .decode(&cleaned)
        .or_else(|_| URL_SAFE_NO_PAD.decode(&cleaned))
        .ok()?;
    String::from_utf8(bytes).ok()
}

fn percent_decode(text: &str) -> String {
    urlencoding::decode(text)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| text.to_string())
}

/// 链接的 scheme，不在支持列表中时返回 None
pub fn link_scheme(link: &str) -> Option<&str> {
    let (scheme, _) = link.split_once("://")?;
    SCHEMES
        .iter()
        .find(|s| s.eq_ignore_ascii_case(scheme))
        .copied()
}

struct LinkParts {
    url: Url,
    query: HashMap<String, String>,
}

impl LinkParts {
    fn parse(link: &str) -> Result<Self> {
        let url = Url::parse(link)?;
        let query = url.query_pairs().into_owned().collect();
        Ok(Self { url, query })
    }

    fn host(&self) -> Result<String> {
        let host = self
            .url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| anyhow!("missing host"))?;
        Ok(unwrap_ipv6_host(host).to_string())
    }

    fn port(&self) -> Result<u16> {
        self.url
            .port_or_known_default()
            .ok_or_else(|| anyhow!("missing port"))
    }

    fn common(&self) -> Result<ServerCommon> {
        Ok(ServerCommon::new(self.host()?, self.port()?).with_name(self.name()))
    }

    fn name(&self) -> String {
        self.url.fragment().map(percent_decode).unwrap_or_default()
    }

    fn username(&self) -> String {
        percent_decode(self.url.username())
    }

    fn password(&self) -> String {
        self.url.password().map(percent_decode).unwrap_or_default()
    }

    fn param(&self, key: &str) -> String {
        self.query.get(key).cloned().unwrap_or_default()
    }

    /// 多个同义参数中第一个非空的
    fn param_any(&self, keys: &[&str]) -> String {
        keys.iter()
            .filter_map(|k| self.query.get(*k))
            .find(|v| !v.is_empty())
            .cloned()
            .unwrap_or_default()
    }

    fn flag(&self, keys: &[&str]) -> bool {
        matches!(self.param_any(keys).as_str(), "1" | "true")
    }
}

/// 解析单个分享链接
pub fn parse_link(link: &str) -> Result<ProxyBean> {
    let link = link.trim();
    let scheme = link_scheme(link).ok_or_else(|| anyhow!("unsupported link"))?;
    match scheme {
        "ss" => parse_shadowsocks(link),
        "vmess" => parse_vmess(link),
        "vless" => parse_vless(link),
        "trojan" => parse_trojan(link),
        "socks" | "socks4" | "socks4a" | "socks5" => parse_socks(link),
        "http" | "https" => parse_http(link),
        "naive+https" | "naive+quic" => parse_naive(link),
        "hysteria" => parse_hysteria(link),
        "hysteria2" | "hy2" => parse_hysteria2(link),
        "tuic" => parse_tuic(link),
        "juicity" => parse_juicity(link),
        "mierus" => parse_mieru(link),
        "anytls" => parse_anytls(link),
        "ssh" => parse_ssh(link),
        _ => Err(anyhow!("unsupported link")),
    }
}

/// 逐行解析链接列表，返回成功的节点和失败的提示
pub fn parse_links(text: &str) -> (Vec<ProxyBean>, Vec<String>) {
    let mut beans = Vec::new();
    let mut warnings = Vec::new();
    for token in text.split_whitespace() {
        if link_scheme(token).is_none() {
            continue;
        }
        match parse_link(token) {
            Ok(bean) => beans.push(bean),
            Err(e) => {
                log::warn!("Failed to parse link {}: {}", token, e);
                warnings.push(format!("{}: {}", token, e));
            }
        }
    }
    (beans, warnings)
}

/// SIP002 / 旧版 base64 整体编码两种格式
fn parse_shadowsocks(link: &str) -> Result<ProxyBean> {
    let body = &link["ss://".len()..];
    let (body, fragment) = body.split_once('#').unwrap_or((body, ""));
    let (main, query) = body.split_once('?').unwrap_or((body, ""));
    let main = main.trim_end_matches('/');

    let (userinfo, host_port) = match main.rsplit_once('@') {
        Some((userinfo, host_port)) => {
            let userinfo = if userinfo.contains(':') {
                percent_decode(userinfo)
            } else {
                decode_base64(&percent_decode(userinfo))
                    .ok_or_else(|| anyhow!("invalid userinfo"))?
            };
            (userinfo, host_port.to_string())
        }
        None => {
            let decoded = decode_base64(main).ok_or_else(|| anyhow!("invalid base64"))?;
            let (userinfo, host_port) = decoded
                .rsplit_once('@')
                .ok_or_else(|| anyhow!("missing server"))?;
            (userinfo.to_string(), host_port.to_string())
        }
    };

    let (method, password) = userinfo
        .split_once(':')
        .ok_or_else(|| anyhow!("missing method"))?;
    let (host, port) = split_host_port(&host_port).ok_or_else(|| anyhow!("invalid server"))?;

    let plugin = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == "plugin")
        .map(|(_, v)| percent_decode(v))
        .unwrap_or_default();

    Ok(ProxyBean::Shadowsocks(ShadowsocksBean {
        common: ServerCommon::new(host, port).with_name(percent_decode(fragment)),
        method: method.to_string(),
        password: password.to_string(),
        plugin,
        udp_over_tcp: false,
    }))
}

/// 标准 v2ray 分享格式中的传输和 TLS 参数
fn stream_from_query(parts: &LinkParts, default_security: &str) -> StreamSettings {
    let mut stream = StreamSettings {
        network: match parts.param("type").as_str() {
            "" => "tcp".to_string(),
            "h2" => "http".to_string(),
            other => other.to_string(),
        },
        host: parts.param("host"),
        path: parts.param("path"),
        security: match parts.param("security").as_str() {
            "" => default_security.to_string(),
            "none" => String::new(),
            "xtls" => "tls".to_string(),
            other => other.to_string(),
        },
        sni: parts.param_any(&["sni", "peer"]),
        alpn: parts.param("alpn"),
        allow_insecure: parts.flag(&["allowInsecure", "insecure"]),
        utls_fingerprint: parts.param("fp"),
        reality_public_key: parts.param("pbk"),
        reality_short_id: parts.param("sid"),
    };
    if stream.network == "grpc" {
        stream.path = parts.param("serviceName");
    }
    stream
}

fn parse_vless(link: &str) -> Result<ProxyBean> {
    let parts = LinkParts::parse(link)?;
    Ok(ProxyBean::Vless(VLessBean {
        common: parts.common()?,
        uuid: parts.username(),
        flow: parts.param("flow").replace("-udp443", ""),
        stream: stream_from_query(&parts, ""),
    }))
}

fn parse_trojan(link: &str) -> Result<ProxyBean> {
    let parts = LinkParts::parse(link)?;
    Ok(ProxyBean::Trojan(TrojanBean {
        common: parts.common()?,
        password: parts.username(),
        stream: stream_from_query(&parts, "tls"),
    }))
}

/// v2rayN 的 base64 JSON 格式，失败时按标准 URL 格式解析
fn parse_vmess(link: &str) -> Result<ProxyBean> {
    let body = &link["vmess://".len()..];
    let Some(json) = decode_base64(body) else {
        let parts = LinkParts::parse(link)?;
        return Ok(ProxyBean::Vmess(VMessBean {
            common: parts.common()?,
            uuid: parts.username(),
            alter_id: parts.param("aid").parse().unwrap_or(0),
            security: match parts.param("encryption").as_str() {
                "" => "auto".to_string(),
                other => other.to_string(),
            },
            stream: stream_from_query(&parts, ""),
        }));
    };

    let value: serde_json::Value = serde_json::from_str(&json)?;
    let text = |key: &str| match &value[key] {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    };

    let port: u16 = text("port").parse().map_err(|_| anyhow!("invalid port"))?;
    let network = match text("net").as_str() {
        "" => "tcp".to_string(),
        "h2" => "http".to_string(),
        other => other.to_string(),
    };
    let mut stream = StreamSettings {
        host: text("host"),
        path: text("path"),
        security: match text("tls").as_str() {
            "tls" | "reality" => text("tls"),
            _ => String::new(),
        },
        sni: text("sni"),
        alpn: text("alpn"),
        utls_fingerprint: text("fp"),
        network,
        ..Default::default()
    };
    // 旧客户端把 grpc 的 serviceName 放在 path 中，tcp 的 http 伪装放在 type 中
    if stream.network == "tcp" && text("type") == "http" {
        stream.network = "http".to_string();
    }
    if stream.sni.is_empty() && stream.tls_enabled() {
        stream.sni = stream.host.clone();
    }

    Ok(ProxyBean::Vmess(VMessBean {
        common: ServerCommon::new(unwrap_ipv6_host(&text("add")), port).with_name(text("ps")),
        uuid: text("id"),
        alter_id: text("aid").parse().unwrap_or(0),
        security: match text("scy").as_str() {
            "" => "auto".to_string(),
            other => other.to_string(),
        },
        stream,
    }))
}

fn parse_socks(link: &str) -> Result<ProxyBean> {
    let parts = LinkParts::parse(link)?;
    let protocol = match parts.url.scheme() {
        "socks4" => "4",
        "socks4a" => "4a",
        _ => "5",
    };
    let mut username = parts.username();
    let mut password = parts.password();
    // 部分客户端把 `user:pass` 整体 base64 后放在用户名位置
    if password.is_empty() && !username.is_empty() {
        if let Some((u, p)) = decode_base64(&username).and_then(|s| {
            s.split_once(':')
                .map(|(u, p)| (u.to_string(), p.to_string()))
        }) {
            username = u;
            password = p;
        }
    }
    Ok(ProxyBean::Socks(SocksBean {
        common: parts.common()?,
        protocol: protocol.to_string(),
        username,
        password,
        udp_over_tcp: false,
    }))
}

fn parse_http(link: &str) -> Result<ProxyBean> {
    let parts = LinkParts::parse(link)?;
    let tls = parts.url.scheme() == "https";
    Ok(ProxyBean::Http(HttpBean {
        common: parts.common()?,
        username: parts.username(),
        password: parts.password(),
        tls,
        sni: parts.param("sni"),
        allow_insecure: parts.flag(&["insecure", "allowInsecure"]),
        path: parts.url.path().trim_start_matches('/').to_string(),
    }))
}

fn parse_naive(link: &str) -> Result<ProxyBean> {
    let parts = LinkParts::parse(link)?;
    let proto = parts
        .url
        .scheme()
        .strip_prefix("naive+")
        .unwrap_or("https")
        .to_string();
    let common = ServerCommon::new(parts.host()?, parts.url.port().unwrap_or(443))
        .with_name(parts.name());
    Ok(ProxyBean::Naive(NaiveBean {
        common,
        proto,
        username: parts.username(),
        password: parts.password(),
        sni: parts.param("sni"),
        extra_headers: parts.param("extra-headers").replace("\r\n", "\n"),
    }))
}

fn parse_hysteria(link: &str) -> Result<ProxyBean> {
    let parts = LinkParts::parse(link)?;
    Ok(ProxyBean::Hysteria(HysteriaBean {
        common: parts.common()?,
        protocol_version: 1,
        auth_payload: parts.param("auth"),
        obfuscation: parts.param("obfsParam"),
        sni: parts.param("peer"),
        alpn: parts.param("alpn"),
        allow_insecure: parts.flag(&["insecure"]),
        upload_mbps: parts.param("upmbps").parse().unwrap_or(0),
        download_mbps: parts.param("downmbps").parse().unwrap_or(0),
        protocol: match parts.param("protocol").as_str() {
            "" => "udp".to_string(),
            other => other.to_string(),
        },
        server_ports: parts.param("mport"),
        hop_interval: String::new(),
    }))
}

fn parse_hysteria2(link: &str) -> Result<ProxyBean> {
    let parts = LinkParts::parse(link)?;
    let password = parts.password();
    let auth = if password.is_empty() {
        parts.username()
    } else {
        format!("{}:{}", parts.username(), password)
    };
    let common = ServerCommon::new(parts.host()?, parts.url.port().unwrap_or(443))
        .with_name(parts.name());
    Ok(ProxyBean::Hysteria(HysteriaBean {
        common,
        protocol_version: 2,
        auth_payload: auth,
        obfuscation: parts.param("obfs-password"),
        sni: parts.param("sni"),
        alpn: String::new(),
        allow_insecure: parts.flag(&["insecure"]),
        server_ports: parts.param("mport"),
        ..Default::default()
    }))
}

fn parse_tuic(link: &str) -> Result<ProxyBean> {
    let parts = LinkParts::parse(link)?;
    Ok(ProxyBean::Tuic(TuicBean {
        common: parts.common()?,
        uuid: parts.username(),
        token: parts.password(),
        congestion_control: parts.param("congestion_control"),
        udp_relay_mode: parts.param("udp_relay_mode"),
        alpn: parts.param("alpn"),
        sni: parts.param("sni"),
        allow_insecure: parts.flag(&["allow_insecure", "insecure"]),
        zero_rtt: parts.flag(&["reduce_rtt", "zero_rtt"]),
    }))
}

fn parse_juicity(link: &str) -> Result<ProxyBean> {
    let parts = LinkParts::parse(link)?;
    Ok(ProxyBean::Juicity(JuicityBean {
        common: parts.common()?,
        uuid: parts.username(),
        password: parts.password(),
        sni: parts.param("sni"),
        allow_insecure: parts.flag(&["allow_insecure", "insecure"]),
        pin_sha256: parts.param("pinned_certchain_sha256"),
    }))
}

/// 端口可以写在地址中，也可以是 `port` 参数
fn parse_mieru(link: &str) -> Result<ProxyBean> {
    let parts = LinkParts::parse(link)?;
    let port = match parts.url.port() {
        Some(port) => port,
        None => parts
            .param("port")
            .split('-')
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| anyhow!("missing port"))?,
    };
    Ok(ProxyBean::Mieru(MieruBean {
        common: ServerCommon::new(parts.host()?, port).with_name(
            match parts.name() {
                name if name.is_empty() => parts.param("profile"),
                name => name,
            },
        ),
        protocol: match parts.param("protocol").to_uppercase().as_str() {
            "" => "TCP".to_string(),
            other => other.to_string(),
        },
        username: parts.username(),
        password: parts.password(),
        mtu: parts.param("mtu").parse().unwrap_or(0),
    }))
}

fn parse_anytls(link: &str) -> Result<ProxyBean> {
    let parts = LinkParts::parse(link)?;
    Ok(ProxyBean::AnyTls(AnyTlsBean {
        common: parts.common()?,
        password: parts.username(),
        sni: parts.param("sni"),
        alpn: parts.param("alpn"),
        allow_insecure: parts.flag(&["insecure", "allowInsecure"]),
    }))
}

fn parse_ssh(link: &str) -> Result<ProxyBean> {
    let parts = LinkParts::parse(link)?;
    let common = ServerCommon::new(parts.host()?, parts.url.port().unwrap_or(22))
        .with_name(parts.name());
    Ok(ProxyBean::Ssh(SshBean {
        common,
        username: parts.username(),
        password: parts.password(),
        public_key: parts.param("public_key"),
        ..Default::default()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;

    #[test]
    fn test_shadowsocks_sip002() {
        let userinfo = URL_SAFE_NO_PAD.encode("aes-128-gcm:test");
        let link = format!(
            "ss://{}@192.168.100.1:8888/?plugin=obfs-local%3Bobfs%3Dhttp#Example%20Node",
            userinfo
        );
        let ProxyBean::Shadowsocks(bean) = parse_link(&link).unwrap() else {
            panic!("expected shadowsocks");
        };
        assert_eq!(bean.common.server_address, "192.168.100.1");
        assert_eq!(bean.common.server_port, 8888);
        assert_eq!(bean.common.name, "Example Node");
        assert_eq!(bean.method, "aes-128-gcm");
        assert_eq!(bean.password, "test");
        assert_eq!(bean.plugin, "obfs-local;obfs=http");
    }

    #[test]
    fn test_shadowsocks_plain_and_legacy() {
        let bean = parse_link("ss://2022-blake3-aes-128-gcm:a%2Bb@[::1]:443#v6").unwrap();
        let ProxyBean::Shadowsocks(bean) = bean else {
            panic!("expected shadowsocks");
        };
        assert_eq!(bean.method, "2022-blake3-aes-128-gcm");
        assert_eq!(bean.password, "a+b");
        assert_eq!(bean.common.server_address, "::1");

        let legacy = format!("ss://{}#old", STANDARD.encode("rc4-md5:pw@example.com:8388"));
        let ProxyBean::Shadowsocks(bean) = parse_link(&legacy).unwrap() else {
            panic!("expected shadowsocks");
        };
        assert_eq!(bean.common.server_address, "example.com");
        assert_eq!(bean.common.server_port, 8388);
        assert_eq!(bean.password, "pw");
    }

    #[test]
    fn test_vmess_json() {
        let json = r#"{"v":"2","ps":"jp","add":"jp.example.com","port":"443","id":"b831381d-6324-4d53-ad4f-8cda48b30811","aid":"0","net":"ws","host":"cdn.example.com","path":"/ray","tls":"tls"}"#;
        let link = format!("vmess://{}", STANDARD.encode(json));
        let ProxyBean::Vmess(bean) = parse_link(&link).unwrap() else {
            panic!("expected vmess");
        };
        assert_eq!(bean.common.name, "jp");
        assert_eq!(bean.common.server_port, 443);
        assert_eq!(bean.security, "auto");
        assert_eq!(bean.stream.network, "ws");
        assert_eq!(bean.stream.path, "/ray");
        // 未给出 sni 时使用伪装域名
        assert_eq!(bean.stream.sni, "cdn.example.com");
    }

    #[test]
    fn test_vless_reality() {
        let link = "vless://uuid-1@example.com:443?type=grpc&serviceName=svc&security=reality&sni=www.apple.com&pbk=KEY&sid=ab&fp=chrome&flow=xtls-rprx-vision#reality";
        let ProxyBean::Vless(bean) = parse_link(link).unwrap() else {
            panic!("expected vless");
        };
        assert_eq!(bean.uuid, "uuid-1");
        assert_eq!(bean.flow, "xtls-rprx-vision");
        assert_eq!(bean.stream.network, "grpc");
        assert_eq!(bean.stream.path, "svc");
        assert_eq!(bean.stream.security, "reality");
        assert_eq!(bean.stream.reality_public_key, "KEY");
        assert_eq!(bean.stream.utls_fingerprint, "chrome");
    }

    #[test]
    fn test_trojan_defaults_to_tls() {
        let ProxyBean::Trojan(bean) =
            parse_link("trojan://secret@example.com:443?sni=a.com#t").unwrap()
        else {
            panic!("expected trojan");
        };
        assert_eq!(bean.password, "secret");
        assert_eq!(bean.stream.security, "tls");
        assert_eq!(bean.stream.network, "tcp");
        assert_eq!(bean.stream.sni, "a.com");
    }

    #[test]
    fn test_socks_and_http() {
        let ProxyBean::Socks(bean) = parse_link("socks4a://example.com:1080").unwrap() else {
            panic!("expected socks");
        };
        assert_eq!(bean.protocol, "4a");

        let encoded = STANDARD.encode("user:pass");
        let ProxyBean::Socks(bean) =
            parse_link(&format!("socks://{}@example.com:1080", encoded)).unwrap()
        else {
            panic!("expected socks");
        };
        assert_eq!(bean.username, "user");
        assert_eq!(bean.password, "pass");

        let ProxyBean::Http(bean) = parse_link("https://u:p@example.com#web").unwrap() else {
            panic!("expected http");
        };
        assert!(bean.tls);
        assert_eq!(bean.common.server_port, 443);
        assert_eq!(bean.common.name, "web");
    }

    #[test]
    fn test_hysteria_family() {
        let ProxyBean::Hysteria(bean) =
            parse_link("hysteria://1.2.3.4:443?protocol=faketcp&auth=pw&peer=a.com&upmbps=10&downmbps=50")
                .unwrap()
        else {
            panic!("expected hysteria");
        };
        assert_eq!(bean.protocol_version, 1);
        assert_eq!(bean.protocol, "faketcp");
        assert_eq!(bean.download_mbps, 50);
        assert!(!bean.can_use_engine());

        let ProxyBean::Hysteria(bean) =
            parse_link("hy2://letmein@example.com/?obfs=salamander&obfs-password=x&insecure=1#h2")
                .unwrap()
        else {
            panic!("expected hysteria2");
        };
        assert_eq!(bean.protocol_version, 2);
        assert_eq!(bean.common.server_port, 443);
        assert_eq!(bean.auth_payload, "letmein");
        assert_eq!(bean.obfuscation, "x");
        assert!(bean.allow_insecure);
    }

    #[test]
    fn test_tuic_and_mieru() {
        let ProxyBean::Tuic(bean) = parse_link(
            "tuic://uuid:pw@example.com:443?congestion_control=bbr&alpn=h3&udp_relay_mode=quic",
        )
        .unwrap() else {
            panic!("expected tuic");
        };
        assert_eq!(bean.token, "pw");
        assert_eq!(bean.congestion_control, "bbr");

        let ProxyBean::Mieru(bean) =
            parse_link("mierus://u:p@1.2.3.4?port=6666&protocol=udp&mtu=1400&profile=default")
                .unwrap()
        else {
            panic!("expected mieru");
        };
        assert_eq!(bean.common.server_port, 6666);
        assert_eq!(bean.protocol, "UDP");
        assert_eq!(bean.common.name, "default");
        assert_eq!(bean.mtu, 1400);
    }

    #[test]
    fn test_parse_links_partial() {
        let text = "vless://id@a.com:443#ok\nnot a link\ntrojan://pw@:443\nsomething://x";
        let (beans, warnings) = parse_links(text);
        assert_eq!(beans.len(), 1);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_decode_base64() {
        assert_eq!(decode_base64("aGVsbG8=").as_deref(), Some("hello"));
        assert_eq!(decode_base64("aGVs\nbG8").as_deref(), Some("hello"));
        assert!(decode_base64("-_8").is_none());
        assert!(decode_base64("").is_none());
    }
}
