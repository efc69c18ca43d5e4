use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// DNS 模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DnsMode {
    /// 未命中规则的域名走远程 DNS
    #[default]
    Default,
    /// 未命中规则的域名走直连 DNS
    Leak,
    /// 远程 DNS 加 ECS，要求配置 client subnet
    Precise,
    /// TUN 入站使用 FakeIP
    FakeDns,
}

/// IPv6 模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ipv6Mode {
    Disable,
    #[default]
    Enable,
    Prefer,
    Only,
}

impl Ipv6Mode {
    pub fn domain_strategy(&self) -> &'static str {
        match self {
            Self::Disable => "ipv4_only",
            Self::Enable => "prefer_ipv4",
            Self::Prefer => "prefer_ipv6",
            Self::Only => "ipv6_only",
        }
    }
}

/// 服务模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    #[default]
    Vpn,
    Proxy,
}

/// 规则集来源
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleSetProvider {
    /// 使用本地资源目录
    #[default]
    Local,
    /// 官方仓库
    Official,
    /// 社区镜像
    Mirror,
    /// 自定义地址
    Custom { ip_url: String, domain_url: String },
}

impl RuleSetProvider {
    /// 返回 (geoip 地址, geosite 地址)，本地模式返回 None
    pub fn remote_urls(&self) -> Option<(String, String)> {
        match self {
            Self::Local => None,
            Self::Official => Some((
                "https://raw.githubusercontent.com/SagerNet/sing-geoip/rule-set".to_string(),
                "https://raw.githubusercontent.com/SagerNet/sing-geosite/rule-set".to_string(),
            )),
            Self::Mirror => Some((
                "https://cdn.jsdelivr.net/gh/SagerNet/sing-geoip@rule-set".to_string(),
                "https://cdn.jsdelivr.net/gh/SagerNet/sing-geosite@rule-set".to_string(),
            )),
            Self::Custom { ip_url, domain_url } => Some((
                ip_url.trim_end_matches('/').to_string(),
                domain_url.trim_end_matches('/').to_string(),
            )),
        }
    }
}

/// 构建设置
///
/// 对应客户端设置页中影响配置生成的所有选项。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildSettings {
    /// 当前选中的节点
    pub selected_proxy: i64,
    pub service_mode: ServiceMode,

    // DNS
    /// 每行一个，`#` 开头为注释
    pub remote_dns: String,
    pub direct_dns: String,
    pub underlying_dns: String,
    pub dns_mode: DnsMode,
    pub enable_dns_routing: bool,
    pub direct_dns_client_subnet: String,
    /// `域名 地址...` 每行一条
    pub dns_hosts: String,
    /// 各 DNS 标签的解析策略，"auto" 或空表示跟随 IPv6 模式
    pub domain_strategy_for_remote: String,
    pub domain_strategy_for_direct: String,
    pub domain_strategy_for_server: String,

    // 入站
    pub ipv6_mode: Ipv6Mode,
    pub allow_access: bool,
    pub mixed_port: u16,
    pub local_dns_port: u16,
    pub inbound_username: String,
    pub inbound_password: String,
    pub tun_stack: String,
    pub mtu: u32,
    /// 0 关闭 / 1 嗅探 / 2 嗅探并覆盖目标
    pub traffic_sniffing: u8,
    pub bypass_lan_in_core: bool,

    // NTP
    pub ntp_enable: bool,
    pub ntp_address: String,
    pub ntp_port: u16,
    pub ntp_interval: String,

    // 其他
    /// 0 panic … 6 trace
    pub log_level: u8,
    pub clash_api_listen: String,
    pub rule_set_provider: RuleSetProvider,
    /// 本地规则集目录，空则使用数据目录下的 geo
    pub external_assets: String,
    pub default_user_agent: String,
}

fn default_remote_dns() -> String {
    "https://dns.google/dns-query".to_string()
}

fn default_direct_dns() -> String {
    "https://223.5.5.5/dns-query".to_string()
}

fn default_user_agent() -> String {
    format!("Conflux/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            selected_proxy: 0,
            service_mode: ServiceMode::Vpn,
            remote_dns: default_remote_dns(),
            direct_dns: default_direct_dns(),
            underlying_dns: String::new(),
            dns_mode: DnsMode::Default,
            enable_dns_routing: true,
            direct_dns_client_subnet: String::new(),
            dns_hosts: String::new(),
            domain_strategy_for_remote: "auto".to_string(),
            domain_strategy_for_direct: "auto".to_string(),
            domain_strategy_for_server: "auto".to_string(),
            ipv6_mode: Ipv6Mode::Enable,
            allow_access: false,
            mixed_port: 2080,
            local_dns_port: 6450,
            inbound_username: String::new(),
            inbound_password: String::new(),
            tun_stack: "mixed".to_string(),
            mtu: 9000,
            traffic_sniffing: 1,
            bypass_lan_in_core: false,
            ntp_enable: false,
            ntp_address: "time.apple.com".to_string(),
            ntp_port: 123,
            ntp_interval: "30m".to_string(),
            log_level: 3,
            clash_api_listen: "127.0.0.1:9090".to_string(),
            rule_set_provider: RuleSetProvider::Local,
            external_assets: String::new(),
            default_user_agent: default_user_agent(),
        }
    }
}

/// 按行拆分 DNS 列表，忽略空行与注释
fn dns_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

impl BuildSettings {
    pub fn remote_dns_list(&self) -> Vec<String> {
        dns_lines(&self.remote_dns)
    }

    pub fn direct_dns_list(&self) -> Vec<String> {
        dns_lines(&self.direct_dns)
    }

    pub fn underlying_dns_list(&self) -> Vec<String> {
        dns_lines(&self.underlying_dns)
    }

    pub fn is_vpn(&self) -> bool {
        self.service_mode == ServiceMode::Vpn
    }

    pub fn log_level_name(&self) -> &'static str {
        match self.log_level {
            0 => "panic",
            1 => "fatal",
            2 => "error",
            3 => "warn",
            4 => "info",
            5 => "debug",
            6 => "trace",
            _ => "info",
        }
    }

    /// 指定 DNS 标签的解析策略，"auto" 视为未设置
    pub fn domain_strategy(&self, tag: &str) -> String {
        let raw = match tag {
            "dns-remote" => &self.domain_strategy_for_remote,
            "dns-direct" => &self.domain_strategy_for_direct,
            _ => &self.domain_strategy_for_server,
        };
        raw.replace("auto", "")
    }

    /// 解析 hosts 设置，每行 `domain addr [addr...]`
    pub fn hosts(&self) -> BTreeMap<String, Vec<String>> {
        let mut hosts = BTreeMap::new();
        for line in dns_lines(&self.dns_hosts) {
            let mut parts = line.split_whitespace();
            let Some(domain) = parts.next() else { continue };
            let addresses: Vec<String> = parts.map(str::to_string).collect();
            if addresses.is_empty() {
                log::warn!("Ignoring hosts entry without address: {}", line);
                continue;
            }
            hosts
                .entry(domain.to_string())
                .or_insert_with(Vec::new)
                .extend(addresses);
        }
        hosts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns_lines_skip_comments() {
        let settings = BuildSettings {
            remote_dns: "# comment\n tls://1.1.1.1 \n\nhttps://dns.google/dns-query".to_string(),
            ..Default::default()
        };
        assert_eq!(
            settings.remote_dns_list(),
            vec!["tls://1.1.1.1", "https://dns.google/dns-query"]
        );
    }

    #[test]
    fn test_domain_strategy_auto() {
        let mut settings = BuildSettings::default();
        assert_eq!(settings.domain_strategy("dns-remote"), "");
        settings.domain_strategy_for_server = "ipv4_only".to_string();
        assert_eq!(settings.domain_strategy("server"), "ipv4_only");
    }

    #[test]
    fn test_hosts_parse() {
        let settings = BuildSettings {
            dns_hosts: "a.com 1.1.1.1 ::1\nbad.com\na.com 2.2.2.2".to_string(),
            ..Default::default()
        };
        let hosts = settings.hosts();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts["a.com"], vec!["1.1.1.1", "::1", "2.2.2.2"]);
    }

    #[test]
    fn test_settings_partial_json() {
        let settings: BuildSettings =
            serde_json::from_str(r#"{"mixedPort": 7890, "dnsMode": "fake-dns"}"#).unwrap();
        assert_eq!(settings.mixed_port, 7890);
        assert_eq!(settings.dns_mode, DnsMode::FakeDns);
        assert_eq!(settings.local_dns_port, 6450);
        assert_eq!(settings.log_level_name(), "warn");
    }

    #[test]
    fn test_rule_set_provider() {
        assert!(RuleSetProvider::Local.remote_urls().is_none());
        let custom = RuleSetProvider::Custom {
            ip_url: "https://a/ip/".to_string(),
            domain_url: "https://a/site".to_string(),
        };
        assert_eq!(
            custom.remote_urls(),
            Some(("https://a/ip".to_string(), "https://a/site".to_string()))
        );
    }
}
