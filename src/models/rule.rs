use serde::{Deserialize, Serialize};

pub const OUTBOUND_PROXY: i64 = 0;
pub const OUTBOUND_DIRECT: i64 = -1;
pub const OUTBOUND_BLOCK: i64 = -2;

/// Clash 模式，小写以兼容 dashboard
pub const MODE_RULE: &str = "rule";
pub const MODE_DIRECT: &str = "direct";
pub const MODE_GLOBAL: &str = "global";
pub const MODE_BLOCK: &str = "block";

/// 规则动作
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleAction {
    #[default]
    Route,
    RouteOptions,
    Reject,
    HijackDns,
    Sniff,
    Resolve,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Route => "route",
            Self::RouteOptions => "route-options",
            Self::Reject => "reject",
            Self::HijackDns => "hijack-dns",
            Self::Sniff => "sniff",
            Self::Resolve => "resolve",
        }
    }
}

/// 路由 / DNS 规则
///
/// 文本字段按行或逗号分隔，`domains` / `ip` 中的每一项都是 RuleItem 语法。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleEntity {
    pub id: i64,
    pub name: String,
    pub user_order: i64,
    pub enabled: bool,
    pub action: RuleAction,

    // 匹配条件
    pub domains: String,
    pub ip: String,
    pub port: String,
    pub source_port: String,
    pub network: String,
    pub source: String,
    pub protocol: String,
    pub rule_set: String,
    /// 0 代理 / -1 直连 / -2 阻断 / >0 节点 id
    pub outbound: i64,
    pub packages: Vec<String>,
    pub ssid: String,
    pub bssid: String,
    pub client_type: String,
    pub clash_mode: String,
    pub network_type: Vec<String>,
    pub network_is_expensive: bool,

    // 动作参数
    pub override_address: String,
    pub override_port: u16,
    pub tls_fragment: bool,
    pub tls_record_fragment: bool,
    pub network_strategy: String,
    pub sniffers: Vec<String>,
    pub sniff_timeout: String,
    pub strategy: String,
    pub disable_cache: bool,
    pub rewrite_ttl: Option<u32>,
    pub client_subnet: String,
    /// reject 动作的方式：default / drop
    pub reject_method: String,
}

impl Default for RuleEntity {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            user_order: 0,
            enabled: true,
            action: RuleAction::Route,
            domains: String::new(),
            ip: String::new(),
            port: String::new(),
            source_port: String::new(),
            network: String::new(),
            source: String::new(),
            protocol: String::new(),
            rule_set: String::new(),
            outbound: OUTBOUND_PROXY,
            packages: Vec::new(),
            ssid: String::new(),
            bssid: String::new(),
            client_type: String::new(),
            clash_mode: String::new(),
            network_type: Vec::new(),
            network_is_expensive: false,
            override_address: String::new(),
            override_port: 0,
            tls_fragment: false,
            tls_record_fragment: false,
            network_strategy: String::new(),
            sniffers: Vec::new(),
            sniff_timeout: String::new(),
            strategy: String::new(),
            disable_cache: false,
            rewrite_ttl: None,
            client_subnet: String::new(),
            reject_method: String::new(),
        }
    }
}

impl RuleEntity {
    pub fn display_name(&self) -> String {
        if self.name.trim().is_empty() {
            format!("Rule {}", self.id)
        } else {
            self.name.clone()
        }
    }

    /// 没有任何匹配条件，即兜底规则
    pub fn has_no_criteria(&self) -> bool {
        self.domains.trim().is_empty()
            && self.ip.trim().is_empty()
            && self.port.trim().is_empty()
            && self.source_port.trim().is_empty()
            && self.network.trim().is_empty()
            && self.source.trim().is_empty()
            && self.protocol.trim().is_empty()
            && self.rule_set.trim().is_empty()
            && self.packages.is_empty()
            && self.ssid.trim().is_empty()
            && self.bssid.trim().is_empty()
            && self.client_type.trim().is_empty()
            && self.clash_mode.trim().is_empty()
            && self.network_type.is_empty()
            && !self.network_is_expensive
    }
}

/// 首次使用时创建的默认规则
pub fn default_rules(countries: &[&str]) -> Vec<RuleEntity> {
    let mut rules = vec![
        RuleEntity {
            name: "Sniff".to_string(),
            action: RuleAction::Sniff,
            sniffers: ["http", "tls", "quic", "dns"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ..Default::default()
        },
        RuleEntity {
            name: "Block QUIC".to_string(),
            enabled: false,
            protocol: "quic".to_string(),
            network: "udp".to_string(),
            outbound: OUTBOUND_BLOCK,
            ..Default::default()
        },
        RuleEntity {
            name: "Block ads".to_string(),
            enabled: false,
            domains: "set:geosite-category-ads-all".to_string(),
            outbound: OUTBOUND_BLOCK,
            ..Default::default()
        },
    ];
    for country in countries {
        if *country == "cn" {
            rules.push(RuleEntity {
                name: "Play Store (cn)".to_string(),
                enabled: false,
                domains: "domain:googleapis.cn".to_string(),
                ..Default::default()
            });
        }
        rules.push(RuleEntity {
            name: format!("Bypass {} domains", country),
            enabled: false,
            domains: format!("set:geosite-{}", country),
            outbound: OUTBOUND_DIRECT,
            ..Default::default()
        });
        rules.push(RuleEntity {
            name: format!("Bypass {} IPs", country),
            enabled: false,
            ip: format!("set:geoip-{}", country),
            outbound: OUTBOUND_DIRECT,
            ..Default::default()
        });
    }
    for (index, rule) in rules.iter_mut().enumerate() {
        rule.user_order = index as i64 + 1;
    }
    rules
}
