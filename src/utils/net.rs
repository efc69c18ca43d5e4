use std::net::IpAddr;

/// 是否为 IP 字面量（IPv6 允许带方括号）
pub fn is_ip_address(host: &str) -> bool {
    unwrap_ipv6_host(host).parse::<IpAddr>().is_ok()
}

/// IPv6 地址加方括号，用于 `host:port` 拼接
pub fn wrap_ipv6_host(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}

pub fn unwrap_ipv6_host(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

/// 按换行或逗号拆分，去掉空白项
pub fn list_by_line_or_comma(raw: &str) -> Vec<String> {
    raw.split(['\n', ','])
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// 拆分 `host:port`，支持 `[v6]:port`
pub fn split_host_port(value: &str) -> Option<(String, u16)> {
    let value = value.trim();
    if let Some(rest) = value.strip_prefix('[') {
        let end = rest.find(']')?;
        let host = &rest[..end];
        let port = rest[end + 1..].strip_prefix(':')?.parse().ok()?;
        return Some((host.to_string(), port));
    }
    let (host, port) = value.rsplit_once(':')?;
    if host.is_empty() || host.contains(':') {
        return None;
    }
    Some((host.to_string(), port.parse().ok()?))
}
