//! SIP008 与 Open Online Config v1 订阅

use serde::Deserialize;
use serde_json::Value;

use crate::error::UpdateError;
use crate::models::{ProxyBean, ServerCommon, ShadowsocksBean};

pub const OOC_VERSION: i64 = 1;
pub const OOC_PROTOCOLS: &[&str] = &["shadowsocks"];

/// 订阅源解析结果，流量字段 -1 表示未提供
#[derive(Debug, Clone, Default)]
pub struct FeedResult {
    pub beans: Vec<ProxyBean>,
    pub bytes_used: i64,
    pub bytes_remaining: i64,
    pub expiry_date: i64,
    pub username: String,
    /// 服务端声明但无法处理的协议
    pub unsupported_protocols: Vec<String>,
}

/// SIP008 / shadowsocks 客户端 JSON 的单个服务器
pub fn parse_shadowsocks_json(value: &Value) -> Option<ProxyBean> {
    let server = value["server"].as_str()?;
    let port = value["server_port"]
        .as_u64()
        .or_else(|| value["server_port"].as_str().and_then(|p| p.parse().ok()))
        .and_then(|p| u16::try_from(p).ok())?;
    let text = |key: &str| value[key].as_str().unwrap_or_default().to_string();

    let plugin = text("plugin");
    let plugin_opts = text("plugin_opts");
    let plugin = match (plugin.is_empty(), plugin_opts.is_empty()) {
        (true, _) => String::new(),
        (false, true) => plugin,
        (false, false) => format!("{};{}", plugin, plugin_opts),
    };

    Some(ProxyBean::Shadowsocks(ShadowsocksBean {
        common: ServerCommon::new(server, port).with_name(text("remarks")),
        method: text("method"),
        password: text("password"),
        plugin,
        udp_over_tcp: false,
    }))
}

fn usage(value: &Value, key: &str) -> i64 {
    value[key].as_i64().unwrap_or(-1)
}

/// https://shadowsocks.org/doc/sip008.html
pub fn parse_sip008(body: &str) -> Result<FeedResult, UpdateError> {
    let root: Value =
        serde_json::from_str(body).map_err(|e| UpdateError::Parse(e.to_string()))?;
    let servers = root["servers"]
        .as_array()
        .ok_or_else(|| UpdateError::Parse("Missing field: servers".to_string()))?;

    Ok(FeedResult {
        beans: servers.iter().filter_map(parse_shadowsocks_json).collect(),
        bytes_used: usage(&root, "bytes_used"),
        bytes_remaining: usage(&root, "bytes_remaining"),
        expiry_date: -1,
        ..Default::default()
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OocToken {
    version: Option<i64>,
    #[serde(default)]
    base_url: String,
    #[serde(default)]
    secret: String,
    #[serde(default)]
    user_id: String,
}

/// 校验 OOC token 并拼出 API 地址 `{baseUrl}/{secret}/ooc/v1/{userId}`
pub fn ooc_api_url(token: &str) -> Result<String, UpdateError> {
    let invalid = |message: &str| UpdateError::Parse(format!("Invalid OOC token: {}", message));
    let token: OocToken = serde_json::from_str(token).map_err(|e| invalid(&e.to_string()))?;

    match token.version {
        Some(OOC_VERSION) => {}
        Some(version) => return Err(invalid(&format!("unsupported version {}", version))),
        None => return Err(invalid("missing field: version")),
    }
    if token.base_url.trim().is_empty() {
        return Err(invalid("missing field: baseUrl"));
    }
    if token.base_url.ends_with('/') {
        return Err(invalid("baseUrl must not contain a trailing slash"));
    }
    if !token.base_url.starts_with("https://") {
        return Err(invalid("protocol scheme must be https"));
    }
    if token.secret.trim().is_empty() {
        return Err(invalid("missing field: secret"));
    }
    if token.user_id.trim().is_empty() {
        return Err(invalid("missing field: userId"));
    }

    Ok(format!(
        "{}/{}/ooc/v1/{}",
        token.base_url,
        urlencoding::encode(&token.secret),
        urlencoding::encode(&token.user_id)
    ))
}

/// https://github.com/Shadowsocks-NET/OpenOnlineConfig
pub fn parse_ooc(body: &str) -> Result<FeedResult, UpdateError> {
    let root: Value =
        serde_json::from_str(body).map_err(|e| UpdateError::Parse(e.to_string()))?;
    let protocols: Vec<String> = root["protocols"]
        .as_array()
        .ok_or_else(|| UpdateError::Parse("Missing field: protocols".to_string()))?
        .iter()
        .filter_map(|p| p.as_str().map(str::to_string))
        .collect();

    let mut result = FeedResult {
        username: root["username"].as_str().unwrap_or_default().to_string(),
        bytes_used: usage(&root, "bytesUsed"),
        bytes_remaining: usage(&root, "bytesRemaining"),
        expiry_date: usage(&root, "expiryDate"),
        ..Default::default()
    };

    for protocol in &protocols {
        if !OOC_PROTOCOLS.contains(&protocol.as_str()) {
            log::warn!("OOC protocol not supported: {}", protocol);
            result.unsupported_protocols.push(protocol.clone());
            continue;
        }
        let entries = root[protocol.as_str()].as_array().into_iter().flatten();
        for entry in entries {
            let text = |key: &str| entry[key].as_str().unwrap_or_default().to_string();
            let Some(port) = entry["port"].as_u64().and_then(|p| u16::try_from(p).ok()) else {
                continue;
            };
            let plugin_name = text("pluginName");
            let plugin = if plugin_name.trim().is_empty() {
                String::new()
            } else {
                format!("{};{}", plugin_name, text("pluginOptions"))
            };
            result.beans.push(ProxyBean::Shadowsocks(ShadowsocksBean {
                common: ServerCommon::new(text("address"), port).with_name(text("name")),
                method: text("method"),
                password: text("password"),
                plugin,
                udp_over_tcp: false,
            }));
        }
    }

    Ok(result)
}
