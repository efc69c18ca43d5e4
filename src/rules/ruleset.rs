use std::collections::BTreeSet;

use crate::models::options::{
    DnsRule, EngineConfig, RouteOptions, RouteRule, RuleSet, RULE_SET_TYPE_LOCAL,
    RULE_SET_TYPE_REMOTE, TYPE_WIREGUARD,
};

const RULE_SET_FORMAT: &str = "binary";

/// 规则集的获取位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleSetSource<'a> {
    /// 远程下载，`geoip-*` 与其他规则集来自两个不同的仓库
    Remote { ip_url: &'a str, domain_url: &'a str },
    /// 本地目录
    Local { path: &'a str },
}

/// 收集 DNS 与路由规则中引用的全部规则集，生成 `route.rule_set`
///
/// 没有任何引用时不会创建 `route`；已有的规则集描述会保留其 tag 并重新生成。
pub fn build_rule_sets(config: &mut EngineConfig, source: &RuleSetSource<'_>) {
    let mut names = BTreeSet::new();
    if let Some(dns) = &config.dns {
        collect_dns(&mut names, &dns.rules);
    }
    if let Some(route) = &config.route {
        collect_route(&mut names, &route.rules);
    }

    if names.is_empty() {
        return;
    }

    let route = config.route.get_or_insert_with(RouteOptions::default);
    if let Some(existing) = &route.rule_set {
        names.extend(existing.iter().map(|set| set.tag.clone()));
    }

    let list = names
        .into_iter()
        .map(|name| rule_set_for(name, source))
        .collect();
    route.rule_set = Some(list);
}

fn rule_set_for(name: String, source: &RuleSetSource<'_>) -> RuleSet {
    match source {
        RuleSetSource::Remote { ip_url, domain_url } => {
            let base = if name.starts_with("geoip-") {
                ip_url
            } else {
                domain_url
            };
            RuleSet {
                url: Some(format!("{}/{}.srs", base, name)),
                tag: name,
                kind: RULE_SET_TYPE_REMOTE.to_string(),
                format: RULE_SET_FORMAT.to_string(),
                path: None,
            }
        }
        RuleSetSource::Local { path } => RuleSet {
            path: Some(format!("{}/{}.srs", path, name)),
            tag: name,
            kind: RULE_SET_TYPE_LOCAL.to_string(),
            format: RULE_SET_FORMAT.to_string(),
            url: None,
        },
    }
}

/// 递归收集，逻辑规则可以任意嵌套
fn collect_dns(names: &mut BTreeSet<String>, rules: &[DnsRule]) {
    for rule in rules {
        match rule {
            DnsRule::Default(rule) => {
                if let Some(sets) = &rule.rule_set {
                    names.extend(sets.iter().cloned());
                }
            }
            DnsRule::Logical(logical) => {
                if let Some(children) = &logical.rules {
                    collect_dns(names, children);
                }
            }
        }
    }
}

fn collect_route(names: &mut BTreeSet<String>, rules: &[RouteRule]) {
    for rule in rules {
        match rule {
            RouteRule::Default(rule) => {
                if let Some(sets) = &rule.rule_set {
                    names.extend(sets.iter().cloned());
                }
            }
            RouteRule::Logical(logical) => {
                if let Some(children) = &logical.rules {
                    collect_route(names, children);
                }
            }
        }
    }
}

/// 需要放进 `endpoints` 而不是 `outbounds` 的类型
pub fn is_endpoint(type_name: &str) -> bool {
    type_name == TYPE_WIREGUARD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::options::{
        DnsOptions, DnsRuleDefault, DnsRuleLogical, RouteRuleDefault, RouteRuleLogical,
        LOGICAL_AND, LOGICAL_OR, LOGICAL_TYPE,
    };

    fn route_leaf(sets: &[&str]) -> RouteRule {
        RouteRuleDefault {
            rule_set: Some(sets.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
        .into()
    }

    fn route_logical(mode: &str, rules: Vec<RouteRule>) -> RouteRule {
        RouteRule::Logical(RouteRuleLogical {
            kind: LOGICAL_TYPE.to_string(),
            mode: mode.to_string(),
            rules: Some(rules),
            ..Default::default()
        })
    }

    const REMOTE: RuleSetSource<'static> = RuleSetSource::Remote {
        ip_url: "https://ip.example",
        domain_url: "https://site.example",
    };

    #[test]
    fn test_no_rule_sets_leaves_route_untouched() {
        let mut config = EngineConfig::default();
        build_rule_sets(&mut config, &REMOTE);
        assert!(config.route.is_none());

        config.route = Some(RouteOptions::default());
        build_rule_sets(&mut config, &REMOTE);
        assert_eq!(config.route.as_ref().unwrap().rule_set, None);
    }

    #[test]
    fn test_nested_logical_collected_once() {
        let deep = route_logical(
            LOGICAL_OR,
            vec![
                route_leaf(&["geosite-cn"]),
                route_logical(
                    LOGICAL_AND,
                    vec![
                        route_leaf(&["geoip-cn", "geosite-cn"]),
                        route_logical(LOGICAL_OR, vec![route_leaf(&["geosite-ads"])]),
                    ],
                ),
            ],
        );
        let mut config = EngineConfig {
            route: Some(RouteOptions {
                rules: vec![deep, route_leaf(&["geoip-cn"])],
                ..Default::default()
            }),
            dns: Some(DnsOptions {
                rules: vec![DnsRule::Logical(DnsRuleLogical {
                    kind: LOGICAL_TYPE.to_string(),
                    mode: LOGICAL_OR.to_string(),
                    rules: Some(vec![DnsRuleDefault {
                        rule_set: Some(vec!["geosite-google".to_string()]),
                        ..Default::default()
                    }
                    .into()]),
                    ..Default::default()
                })],
                ..Default::default()
            }),
            ..Default::default()
        };

        build_rule_sets(&mut config, &REMOTE);
        let sets = config.route.unwrap().rule_set.unwrap();
        let tags: Vec<&str> = sets.iter().map(|s| s.tag.as_str()).collect();
        assert_eq!(
            tags,
            vec!["geoip-cn", "geosite-ads", "geosite-cn", "geosite-google"]
        );
        assert_eq!(
            sets[0].url.as_deref(),
            Some("https://ip.example/geoip-cn.srs")
        );
        assert_eq!(
            sets[1].url.as_deref(),
            Some("https://site.example/geosite-ads.srs")
        );
        assert_eq!(sets[0].kind, RULE_SET_TYPE_REMOTE);
    }

    #[test]
    fn test_existing_tags_preserved_and_local() {
        let mut config = EngineConfig {
            route: Some(RouteOptions {
                rules: vec![route_leaf(&["geosite-cn"])],
                rule_set: Some(vec![RuleSet {
                    tag: "custom".to_string(),
                    kind: RULE_SET_TYPE_REMOTE.to_string(),
                    format: RULE_SET_FORMAT.to_string(),
                    url: Some("https://x/custom.srs".to_string()),
                    path: None,
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        build_rule_sets(&mut config, &RuleSetSource::Local { path: "/data/geo" });
        let sets = config.route.unwrap().rule_set.unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].tag, "custom");
        assert_eq!(sets[1].path.as_deref(), Some("/data/geo/geosite-cn.srs"));
        assert_eq!(sets[1].kind, RULE_SET_TYPE_LOCAL);

        // 重复收集结果不变
        let mut again = EngineConfig {
            route: Some(RouteOptions {
                rules: vec![route_leaf(&["geosite-cn"])],
                rule_set: Some(sets.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };
        build_rule_sets(&mut again, &RuleSetSource::Local { path: "/data/geo" });
        assert_eq!(again.route.unwrap().rule_set.unwrap().len(), 2);
    }

    #[test]
    fn test_is_endpoint() {
        assert!(is_endpoint("wireguard"));
        assert!(!is_endpoint("vmess"));
    }
}
