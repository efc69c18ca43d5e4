//! 用户规则编译

use std::collections::BTreeSet;

use super::builder::{
    BuildSession, FAKE_DNS_QUERY_TYPE, TAG_BLOCK, TAG_DIRECT, TAG_DNS_DIRECT, TAG_DNS_FAKE,
    TAG_DNS_FINAL, TAG_DNS_REMOTE, TAG_PROXY, TAG_TUN,
};
use crate::models::options::{
    DnsRule, DnsRuleDefault, RouteRule, RouteRuleDefault, ACTION_REJECT, ACTION_ROUTE,
};
use crate::models::{
    DnsMode, RuleAction, RuleEntity, OUTBOUND_BLOCK, OUTBOUND_DIRECT, OUTBOUND_PROXY,
};
use crate::rules::RuleItem;
use crate::utils::list_by_line_or_comma;

/// 应用 uid 从 10000 开始，1000 以下为系统保留
const MIN_APP_UID: u32 = 1000;

fn non_empty_list(raw: &str) -> Option<Vec<String>> {
    let list = list_by_line_or_comma(raw);
    (!list.is_empty()).then_some(list)
}

fn non_empty(raw: &str) -> Option<String> {
    let raw = raw.trim();
    (!raw.is_empty()).then(|| raw.to_string())
}

/// 端口列表：`a:b` 为范围，其余为单个端口
fn split_ports(raw: &str) -> (Option<Vec<u16>>, Option<Vec<String>>) {
    let mut ports = Vec::new();
    let mut ranges = Vec::new();
    for item in list_by_line_or_comma(raw) {
        if item.contains(':') {
            ranges.push(item);
        } else {
            match item.parse::<u16>() {
                Ok(port) => ports.push(port),
                Err(_) => log::warn!("Ignoring invalid port: {}", item),
            }
        }
    }
    (
        (!ports.is_empty()).then_some(ports),
        (!ranges.is_empty()).then_some(ranges),
    )
}

impl BuildSession<'_> {
    /// 把启用的规则编译为 (DNS 规则, 路由规则)，顺序与输入一致
    pub(super) fn compile_rules(
        &mut self,
        rules: &[RuleEntity],
        root_id: i64,
    ) -> (Vec<DnsRule>, Vec<RouteRule>) {
        let mut dns_rules = Vec::new();
        let mut route_rules = Vec::new();

        for rule in rules {
            let uids = self.resolve_packages(rule);
            let mut route = self.match_criteria(rule, &uids);

            match rule.action {
                RuleAction::Route => {
                    dns_rules.extend(self.dns_companion(rule, &uids));

                    let outbound = match rule.outbound {
                        OUTBOUND_PROXY => Some(TAG_PROXY.to_string()),
                        OUTBOUND_DIRECT => Some(TAG_DIRECT.to_string()),
                        OUTBOUND_BLOCK => Some(TAG_BLOCK.to_string()),
                        id if id == root_id => Some(TAG_PROXY.to_string()),
                        id => self.tag_map.get(&id).cloned(),
                    };
                    let Some(outbound) = outbound else {
                        self.warn(format!(
                            "{}: A non-existent outbound was specified.",
                            rule.display_name()
                        ));
                        continue;
                    };
                    route.action = Some(ACTION_ROUTE.to_string());
                    route.outbound = Some(outbound);
                }
                RuleAction::RouteOptions => {
                    route.action = Some(rule.action.as_str().to_string());
                    route.override_address = non_empty(&rule.override_address);
                    route.override_port = (rule.override_port > 0).then_some(rule.override_port);
                    route.tls_fragment = rule.tls_fragment.then_some(true);
                    route.tls_record_fragment = rule.tls_record_fragment.then_some(true);
                    route.network_strategy = non_empty(&rule.network_strategy);
                }
                RuleAction::Reject => {
                    route.action = Some(ACTION_REJECT.to_string());
                    route.method = non_empty(&rule.reject_method);
                }
                RuleAction::HijackDns => {
                    route.action = Some(rule.action.as_str().to_string());
                    route_rules.push(route.into());
                    continue;
                }
                RuleAction::Sniff => {
                    route.action = Some(rule.action.as_str().to_string());
                    route.sniffer = (!rule.sniffers.is_empty()).then(|| rule.sniffers.clone());
                    route.timeout = non_empty(&rule.sniff_timeout);
                    route_rules.push(route.into());
                    continue;
                }
                RuleAction::Resolve => {
                    route.action = Some(rule.action.as_str().to_string());
                    route.strategy = non_empty(&rule.strategy);
                    route.disable_cache = rule.disable_cache.then_some(true);
                    route.rewrite_ttl = rule.rewrite_ttl;
                    route.client_subnet = non_empty(&rule.client_subnet);
                }
            }

            // 条件全部被剪掉的规则会匹配所有流量，只有本就没有条件的兜底规则才保留
            if !route.check_empty() || rule.has_no_criteria() {
                route_rules.push(route.into());
            } else {
                log::debug!("Dropping rule without effective criteria: {}", rule.display_name());
            }
        }

        (dns_rules, route_rules)
    }

    fn resolve_packages(&mut self, rule: &RuleEntity) -> Vec<u32> {
        if rule.packages.is_empty() {
            return Vec::new();
        }
        if !self.settings.is_vpn() {
            self.warn(format!(
                "{}: Per-app rules only take effect in VPN mode.",
                rule.display_name()
            ));
        }
        let Some(resolver) = self.packages else {
            return Vec::new();
        };
        let uids: BTreeSet<u32> = rule
            .packages
            .iter()
            .filter_map(|package| resolver.uid(package))
            .filter(|&uid| uid >= MIN_APP_UID)
            .collect();
        uids.into_iter().collect()
    }

    /// 路由规则的匹配部分
    fn match_criteria(&self, rule: &RuleEntity, uids: &[u32]) -> RouteRuleDefault {
        let mut route = RouteRuleDefault {
            user_id: (!uids.is_empty()).then(|| uids.to_vec()),
            rule_set: non_empty_list(&rule.rule_set),
            ..Default::default()
        };

        let domains = list_by_line_or_comma(&rule.domains);
        if !domains.is_empty() {
            route.make_common_rule(&RuleItem::parse_all(&domains, false), false);
        }
        let ip = list_by_line_or_comma(&rule.ip);
        if !ip.is_empty() {
            route.make_common_rule(&RuleItem::parse_all(&ip, false), true);
        }

        (route.port, route.port_range) = split_ports(&rule.port);
        (route.source_port, route.source_port_range) = split_ports(&rule.source_port);
        route.network = non_empty_list(&rule.network);
        route.source_ip_cidr = non_empty_list(&rule.source);
        route.protocol = non_empty_list(&rule.protocol);
        route.wifi_ssid = non_empty_list(&rule.ssid);
        route.wifi_bssid = non_empty_list(&rule.bssid);
        route.client = non_empty_list(&rule.client_type);
        route.clash_mode = non_empty(&rule.clash_mode);
        route.network_type = (!rule.network_type.is_empty()).then(|| rule.network_type.clone());
        route.network_is_expensive = rule.network_is_expensive.then_some(true);
        route
    }

    /// 路由规则对应的 DNS 规则：直连走直连 DNS，代理走远程 DNS，阻断直接拒绝
    fn dns_companion(&self, rule: &RuleEntity, uids: &[u32]) -> Vec<DnsRule> {
        let mut base = DnsRuleDefault::default();
        let domains = list_by_line_or_comma(&rule.domains);
        base.make_common_rule(&RuleItem::parse_all(&domains, true));
        let mut rule_set = base.rule_set.take().unwrap_or_default();
        rule_set.extend(list_by_line_or_comma(&rule.rule_set));
        base.rule_set = (!rule_set.is_empty()).then_some(rule_set);
        base.user_id = (!uids.is_empty()).then(|| uids.to_vec());

        if base.check_empty() {
            return Vec::new();
        }

        let settings = self.settings;
        match rule.outbound {
            OUTBOUND_DIRECT => {
                let precise = settings.dns_mode == DnsMode::Precise
                    && base
                        .rule_set
                        .iter()
                        .flatten()
                        .any(|name| name.starts_with("geoip-"));
                base.server = Some(if precise { TAG_DNS_FINAL } else { TAG_DNS_DIRECT }.to_string());
                base.strategy = Some(self.auto_strategy(TAG_DNS_DIRECT));
                vec![base.into()]
            }
            OUTBOUND_PROXY => {
                let mut list = Vec::new();
                if settings.dns_mode == DnsMode::FakeDns {
                    let mut fake = base.clone();
                    fake.inbound = Some(vec![TAG_TUN.to_string()]);
                    fake.query_type = Some(FAKE_DNS_QUERY_TYPE.iter().map(|s| s.to_string()).collect());
                    fake.server = Some(TAG_DNS_FAKE.to_string());
                    fake.disable_cache = Some(true);
                    list.push(fake.into());
                }
                base.server = Some(TAG_DNS_REMOTE.to_string());
                base.strategy = Some(self.auto_strategy(TAG_DNS_REMOTE));
                list.push(base.into());
                list
            }
            OUTBOUND_BLOCK => {
                base.action = Some(ACTION_REJECT.to_string());
                vec![base.into()]
            }
            _ => Vec::new(),
        }
    }
}
