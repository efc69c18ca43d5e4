//! 规则项到引擎规则的转换
//!
//! 空列表一律置为 `None`：字段缺失才表示"不限制"，空数组会被引擎当成永不匹配。

use regex::Regex;

use super::item::{RuleItem, RuleItemType};
use crate::models::options::{DnsRuleDefault, RouteRuleDefault};

/// 去掉空白项，结果为空时返回 `None`
fn prune(list: Vec<String>) -> Option<Vec<String>> {
    let list: Vec<String> = list.into_iter().filter(|s| !s.trim().is_empty()).collect();
    if list.is_empty() {
        None
    } else {
        Some(list)
    }
}

fn present<T>(list: &Option<Vec<T>>) -> bool {
    list.as_ref().is_some_and(|l| !l.is_empty())
}

fn flag(value: Option<bool>) -> bool {
    value == Some(true)
}

fn filled(value: &Option<String>) -> bool {
    value.as_ref().is_some_and(|s| !s.is_empty())
}

#[derive(Default)]
struct DomainBuckets {
    domain: Vec<String>,
    suffix: Vec<String>,
    regex: Vec<String>,
    keyword: Vec<String>,
    rule_set: Vec<String>,
}

impl DomainBuckets {
    fn push(&mut self, item: &RuleItem) {
        let content = item.content.clone();
        match item.item_type {
            RuleItemType::RuleSet => self.rule_set.push(content),
            RuleItemType::Full => self.domain.push(content),
            RuleItemType::DomainSuffix => self.suffix.push(content),
            RuleItemType::Regex => match Regex::new(&content) {
                Ok(_) => self.regex.push(content),
                Err(e) => log::warn!("Ignoring invalid domain regex {}: {}", content, e),
            },
            RuleItemType::Keyword => self.keyword.push(content),
        }
    }
}

impl DnsRuleDefault {
    /// 用规则项填充 DNS 匹配字段
    ///
    /// `private` / `any` 分别设置目标地址私有与接受任意地址标志。
    pub fn make_common_rule(&mut self, items: &[RuleItem]) {
        let mut buckets = DomainBuckets::default();
        let mut is_private = false;
        let mut accept_any = false;

        for item in items {
            if item.is_any() {
                accept_any = true;
                continue;
            }
            if item.is_private() {
                is_private = true;
                continue;
            }
            buckets.push(item);
        }

        self.domain = prune(buckets.domain);
        self.domain_suffix = prune(buckets.suffix);
        self.domain_regex = prune(buckets.regex);
        self.domain_keyword = prune(buckets.keyword);
        self.rule_set = prune(buckets.rule_set);
        self.ip_is_private = is_private.then_some(true);
        self.ip_accept_any = accept_any.then_some(true);
    }

    /// 没有任何匹配条件
    pub fn check_empty(&self) -> bool {
        !(flag(self.ip_is_private)
            || flag(self.ip_accept_any)
            || present(&self.rule_set)
            || present(&self.domain)
            || present(&self.domain_suffix)
            || present(&self.domain_regex)
            || present(&self.domain_keyword)
            || present(&self.user_id)
            || present(&self.wifi_ssid)
            || present(&self.wifi_bssid))
    }
}

impl RouteRuleDefault {
    /// 用规则项填充路由匹配字段
    ///
    /// 带 `+dns` 的项只在 DNS 阶段生效，这里跳过。`private` 在路由层设置的是
    /// 来源地址私有标志，与 DNS 层不同；`any` 只对 DNS 有意义。
    /// 规则集在多次调用间累积，域名与 IP 两次调用可以共用同一个列表。
    pub fn make_common_rule(&mut self, items: &[RuleItem], is_ip: bool) {
        let mut buckets = DomainBuckets::default();
        let mut cidr = Vec::new();
        let mut rule_set = self.rule_set.take().unwrap_or_default();

        for item in items.iter().filter(|item| !item.dns) {
            if is_ip {
                if item.is_any() {
                    continue;
                }
                if item.is_private() {
                    self.source_ip_is_private = Some(true);
                    continue;
                }
                match item.item_type {
                    RuleItemType::RuleSet => rule_set.push(item.content.clone()),
                    _ => cidr.push(item.content.clone()),
                }
            } else if item.item_type == RuleItemType::RuleSet {
                rule_set.push(item.content.clone());
            } else {
                buckets.push(item);
            }
        }

        if is_ip {
            self.ip_cidr = prune(cidr);
        } else {
            self.domain = prune(buckets.domain);
            self.domain_suffix = prune(buckets.suffix);
            self.domain_regex = prune(buckets.regex);
            self.domain_keyword = prune(buckets.keyword);
        }
        self.rule_set = prune(rule_set);
        if self.ip_is_private == Some(false) {
            self.ip_is_private = None;
        }
    }

    /// 匹配条件与动作参数全部为空
    pub fn check_empty(&self) -> bool {
        let matches = present(&self.ip_cidr)
            || present(&self.rule_set)
            || flag(self.ip_is_private)
            || flag(self.source_ip_is_private)
            || present(&self.domain)
            || present(&self.domain_suffix)
            || present(&self.domain_regex)
            || present(&self.domain_keyword)
            || present(&self.user_id)
            || present(&self.port)
            || present(&self.port_range)
            || present(&self.source_port)
            || present(&self.source_port_range)
            || present(&self.network)
            || present(&self.protocol)
            || present(&self.client)
            || present(&self.source_ip_cidr)
            || present(&self.wifi_ssid)
            || present(&self.wifi_bssid)
            || filled(&self.clash_mode)
            || present(&self.network_type)
            || flag(self.network_is_expensive);

        let action_params = filled(&self.override_address)
            || self.override_port.is_some_and(|p| p > 0)
            || flag(self.tls_fragment)
            || flag(self.tls_record_fragment)
            || self.strategy.is_some()
            || flag(self.disable_cache)
            || self.rewrite_ttl.is_some()
            || filled(&self.client_subnet)
            || filled(&self.timeout)
            || present(&self.sniffer);

        !(matches || action_params)
    }
}
