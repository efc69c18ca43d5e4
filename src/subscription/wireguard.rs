//! WireGuard 配置文件（`[Interface]` / `[Peer]`）

use anyhow::{anyhow, Result};

use crate::models::{ProxyBean, ServerCommon, WireGuardBean};

const DEFAULT_MTU: u32 = 1408;

type Section = Vec<(String, String)>;

/// 按节拆分，键名转小写，同名键保留全部
fn sections(conf: &str) -> Vec<(String, Section)> {
    let mut result: Vec<(String, Section)> = Vec::new();
    for line in conf.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            result.push((name.trim().to_lowercase(), Vec::new()));
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if let Some((_, entries)) = result.last_mut() {
            entries.push((key.trim().to_lowercase(), value.trim().to_string()));
        }
    }
    result
}

fn get<'a>(section: &'a Section, key: &str) -> Option<&'a str> {
    section
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// 每个可用的 peer 生成一个节点
pub fn parse_wireguard_conf(conf: &str) -> Result<Vec<ProxyBean>> {
    let sections = sections(conf);
    let iface = sections
        .iter()
        .find(|(name, _)| name == "interface")
        .map(|(_, s)| s)
        .ok_or_else(|| anyhow!("Missing 'Interface' section"))?;

    let addresses: Vec<&str> = iface
        .iter()
        .filter(|(k, _)| k == "address")
        .flat_map(|(_, v)| v.split(','))
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .collect();
    if addresses.is_empty() {
        return Err(anyhow!("Empty address in 'Interface' section"));
    }

    let template = WireGuardBean {
        local_address: addresses.join("\n"),
        private_key: get(iface, "privatekey").unwrap_or_default().to_string(),
        mtu: get(iface, "mtu")
            .and_then(|m| m.parse().ok())
            .unwrap_or(DEFAULT_MTU),
        ..Default::default()
    };

    let peers: Vec<&Section> = sections
        .iter()
        .filter(|(name, _)| name == "peer")
        .map(|(_, s)| s)
        .collect();
    if peers.is_empty() {
        return Err(anyhow!("Missing 'Peer' sections"));
    }

    let mut beans = Vec::new();
    for peer in peers {
        let Some((host, port)) = get(peer, "endpoint").and_then(|e| {
            let (host, port) = e.rsplit_once(':')?;
            Some((host.trim_matches(['[', ']']), port.parse::<u16>().ok()?))
        }) else {
            continue;
        };
        let Some(public_key) = get(peer, "publickey") else {
            continue;
        };
        let mut bean = template.clone();
        bean.common = ServerCommon::new(host, port);
        bean.peer_public_key = public_key.to_string();
        bean.peer_pre_shared_key = get(peer, "presharedkey").unwrap_or_default().to_string();
        beans.push(ProxyBean::WireGuard(bean));
    }

    if beans.is_empty() {
        return Err(anyhow!("Empty available peer list"));
    }
    Ok(beans)
}
