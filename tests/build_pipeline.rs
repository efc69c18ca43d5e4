//! End-to-end build tests: store → resolver → rule compiler → engine JSON

use conflux_core::config::{build_config, BuildOptions, ChainResolver, ConfigBuilder};
use conflux_core::error::BuildError;
use conflux_core::models::{
    BuildSettings, ChainBean, DirectBean, Profile, ProxyBean, ProxyGroup, RuleAction, RuleEntity,
    ServerCommon, ShadowsocksBean, SocksBean, OUTBOUND_BLOCK, OUTBOUND_DIRECT,
};
use conflux_core::store::{MemoryStore, ProfileStore};
use conflux_core::utils::SequentialPortAllocator;
use serde_json::{json, Value};

fn insert(store: &MemoryStore, group_id: i64, bean: ProxyBean) -> Profile {
    store.insert_profile(Profile::new(group_id, bean)).unwrap()
}

fn shadowsocks(host: &str) -> ProxyBean {
    ProxyBean::Shadowsocks(ShadowsocksBean {
        common: ServerCommon::new(host, 8388),
        method: "aes-128-gcm".to_string(),
        password: "pw".to_string(),
        ..Default::default()
    })
}

fn outbound<'a>(config: &'a Value, tag: &str) -> &'a Value {
    config["outbounds"]
        .as_array()
        .and_then(|list| list.iter().find(|o| o["tag"] == tag))
        .unwrap_or_else(|| panic!("outbound {} not found", tag))
}

#[test]
fn chain_is_reversed_and_exit_takes_proxy_tag() {
    let store = MemoryStore::new();
    let group = store.insert_group(ProxyGroup::new("g")).unwrap();
    let p1 = insert(
        &store,
        group.id,
        ProxyBean::Direct(DirectBean {
            common: ServerCommon::new("1.2.3.4", 0),
        }),
    );
    let p2 = insert(&store, group.id, shadowsocks("5.6.7.8"));
    let chain = insert(
        &store,
        group.id,
        ProxyBean::Chain(ChainBean {
            proxies: vec![p2.id, p1.id],
            ..Default::default()
        }),
    );

    let hops: Vec<i64> = ChainResolver::new(&store)
        .resolve(&chain)
        .unwrap()
        .iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(hops, vec![p1.id, p2.id]);

    let settings = BuildSettings::default();
    let ports = SequentialPortAllocator::new(40000);
    let result = build_config(&store, &settings, &ports, &chain, BuildOptions::default()).unwrap();
    let exit = outbound(&result.config, "proxy");
    assert_eq!(exit["type"], "direct");
    assert_eq!(exit["detour"], format!("g-{}", p2.id));
    assert_eq!(outbound(&result.config, &format!("g-{}", p2.id))["server"], "5.6.7.8");
    assert_eq!(result.profile_tag_map[&p1.id], "proxy");
}

#[test]
fn direct_rule_yields_dns_and_route_artifacts() {
    let store = MemoryStore::new();
    let group = store.insert_group(ProxyGroup::new("g")).unwrap();
    let profile = insert(&store, group.id, shadowsocks("ss.example.com"));
    store
        .insert_rule(RuleEntity {
            name: "example".to_string(),
            domains: "full:example.com".to_string(),
            action: RuleAction::Route,
            outbound: OUTBOUND_DIRECT,
            ..Default::default()
        })
        .unwrap();

    let settings = BuildSettings::default();
    let ports = SequentialPortAllocator::new(40000);
    let result = ConfigBuilder::new(&store, &settings, &ports)
        .build(&profile)
        .unwrap();
    let config = &result.config;

    let dns_rule = config["dns"]["rules"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["domain"] == json!(["example.com"]))
        .expect("dns rule");
    assert_eq!(dns_rule["server"], "dns-direct");

    let route_rule = config["route"]["rules"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["domain"] == json!(["example.com"]))
        .expect("route rule");
    assert_eq!(route_rule["outbound"], "direct");
}

#[test]
fn build_is_deterministic() {
    let store = MemoryStore::new();
    let group = store.insert_group(ProxyGroup::new("g")).unwrap();
    let a = insert(&store, group.id, shadowsocks("a.example.com"));
    let b = insert(
        &store,
        group.id,
        ProxyBean::Socks(SocksBean {
            common: ServerCommon::new("b.example.com", 1080),
            ..Default::default()
        }),
    );
    let chain = insert(
        &store,
        group.id,
        ProxyBean::Chain(ChainBean {
            proxies: vec![a.id, b.id],
            ..Default::default()
        }),
    );
    for rule in [
        RuleEntity {
            domains: "domain:cn\nset:geosite-cn".to_string(),
            outbound: OUTBOUND_DIRECT,
            ..Default::default()
        },
        RuleEntity {
            domains: "keyword:ads".to_string(),
            outbound: OUTBOUND_BLOCK,
            ..Default::default()
        },
        RuleEntity {
            ip: "set:geoip-cn\n10.0.0.0/8".to_string(),
            outbound: a.id,
            ..Default::default()
        },
    ] {
        store.insert_rule(rule).unwrap();
    }

    let settings = BuildSettings::default();
    let first = build_config(
        &store,
        &settings,
        &SequentialPortAllocator::new(40000),
        &chain,
        BuildOptions::default(),
    )
    .unwrap();
    let second = build_config(
        &store,
        &settings,
        &SequentialPortAllocator::new(40000),
        &chain,
        BuildOptions::default(),
    )
    .unwrap();
    assert_eq!(
        first.to_json_string().unwrap(),
        second.to_json_string().unwrap()
    );
    assert_eq!(first.digest(), second.digest());
}

#[test]
fn cyclic_chain_is_rejected() {
    let store = MemoryStore::new();
    let group = store.insert_group(ProxyGroup::new("g")).unwrap();
    let p = insert(&store, group.id, shadowsocks("1.1.1.1"));
    let outer = insert(
        &store,
        group.id,
        ProxyBean::Chain(ChainBean {
            proxies: vec![p.id],
            ..Default::default()
        }),
    );
    let inner = insert(
        &store,
        group.id,
        ProxyBean::Chain(ChainBean {
            proxies: vec![outer.id],
            ..Default::default()
        }),
    );
    // outer → inner → outer
    let mut looped = outer.clone();
    looped.bean = ProxyBean::Chain(ChainBean {
        proxies: vec![p.id, inner.id],
        ..Default::default()
    });
    store.update_profile(&looped).unwrap();

    let settings = BuildSettings::default();
    let ports = SequentialPortAllocator::new(40000);
    let err = build_config(&store, &settings, &ports, &looped, BuildOptions::default())
        .unwrap_err();
    assert!(matches!(err, BuildError::CyclicReference(_)));
    assert!(err.to_string().contains("Cyclic reference"));
}

#[test]
fn rule_sets_collected_once() {
    let store = MemoryStore::new();
    let group = store.insert_group(ProxyGroup::new("g")).unwrap();
    let profile = insert(&store, group.id, shadowsocks("1.1.1.1"));
    for rule in [
        RuleEntity {
            domains: "set:geosite-google\nset:geosite-youtube".to_string(),
            ..Default::default()
        },
        RuleEntity {
            rule_set: "geosite-google,geoip-google".to_string(),
            outbound: OUTBOUND_DIRECT,
            ..Default::default()
        },
        RuleEntity {
            domains: "set:geosite-youtube".to_string(),
            outbound: OUTBOUND_BLOCK,
            ..Default::default()
        },
    ] {
        store.insert_rule(rule).unwrap();
    }

    let settings = BuildSettings::default();
    let ports = SequentialPortAllocator::new(40000);
    let result = build_config(&store, &settings, &ports, &profile, BuildOptions::default())
        .unwrap();
    let tags: Vec<&str> = result.config["route"]["rule_set"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|s| s["tag"].as_str())
        .collect();
    assert_eq!(tags, vec!["geoip-google", "geosite-google", "geosite-youtube"]);
}

#[test]
fn missing_outbound_warns_and_sniff_kept() {
    let store = MemoryStore::new();
    let group = store.insert_group(ProxyGroup::new("g")).unwrap();
    let profile = insert(&store, group.id, shadowsocks("1.1.1.1"));
    store
        .insert_rule(RuleEntity {
            name: "stale".to_string(),
            outbound: 9999,
            ..Default::default()
        })
        .unwrap();
    store
        .insert_rule(RuleEntity {
            name: "sniff all".to_string(),
            action: RuleAction::Sniff,
            ..Default::default()
        })
        .unwrap();

    let settings = BuildSettings::default();
    let ports = SequentialPortAllocator::new(40000);
    let result = build_config(&store, &settings, &ports, &profile, BuildOptions::default())
        .unwrap();

    assert_eq!(
        result.warnings,
        vec!["stale: A non-existent outbound was specified.".to_string()]
    );
    let rules = result.config["route"]["rules"].as_array().unwrap();
    assert!(rules.iter().all(|r| r["outbound"] != "stale"));
    // 内置嗅探一条，用户嗅探规则一条
    assert_eq!(rules.iter().filter(|r| r["action"] == "sniff").count(), 2);
}
