//! 把展开后的链 / 代理集合落成 outbound

use std::collections::HashSet;

use super::builder::{BuildSession, MappedInbound, LOCALHOST4, TAG_DIRECT, TAG_PROXY};
use super::hop::build_hop;
use super::resolver::ChainResolver;
use crate::error::BuildError;
use crate::models::options::{
    DirectInbound, Inbound, InboundKind, Outbound, OutboundKind, RouteRuleDefault,
    SelectorOutbound, SocksOutbound, UrlTestOutbound, ACTION_ROUTE,
};
use crate::models::{ExternalChain, ExternalHop, Profile, ProxyBean, SetManagement};
use crate::utils::is_ip_address;

/// 上一跳的信息，用于连接下一跳
pub(super) struct PastHop {
    outbound_index: usize,
    /// 外部插件经映射入站回到引擎时的入站 tag
    mapped_inbound: Option<String>,
    server_address: String,
}

impl BuildSession<'_> {
    /// 构建一条链，返回入口 tag
    ///
    /// 下标 0 是出口，最后一跳最先连接且在整次构建中只生成一次，
    /// 再次遇到时直接复用已有的 tag。
    pub(super) fn build_chain(
        &mut self,
        chain_id: i64,
        entity: &Profile,
    ) -> Result<String, BuildError> {
        let list = ChainResolver::new(self.store).resolve(entity)?;
        if list.last().is_some_and(Profile::is_proxy_set) {
            return self.build_proxy_set(chain_id, entity, &list);
        }
        if list.is_empty() {
            return Err(BuildError::InvalidConfig(format!(
                "profile {} resolves to no proxy",
                entity.id
            )));
        }

        let chain_tag = format!("c-{}", chain_id);
        let mut external = ExternalChain::default();
        let mut chain_tag_out = String::new();
        let mut past: Option<PastHop> = None;
        let last = list.len() - 1;

        for (index, profile) in list.iter().enumerate() {
            let is_last = index == last;
            let mut tag_out = format!("{}-{}", chain_tag, profile.id);
            let mut cached = None;
            if is_last {
                tag_out = format!("g-{}", profile.id);
                self.bypass_beans.push(profile.bean.clone());
                cached = self.global_outbounds.get(&profile.id).cloned();
            }

            match &cached {
                Some(tag) => tag_out = tag.clone(),
                None => {
                    if self.build_selector && index == 0 {
                        tag_out = self.selector_name(&profile.display_name());
                    } else if chain_id == 0 && index == 0 {
                        tag_out = TAG_PROXY.to_string();
                    } else if !is_last {
                        // 同一节点可以在链中出现多次
                        tag_out = self.unique_hop_tag(&tag_out);
                    }
                }
            }

            match &past {
                Some(past) => self.link(past, &tag_out),
                None => chain_tag_out = tag_out.clone(),
            }

            if cached.is_some() {
                log::debug!("Reusing outbound {} for profile {}", tag_out, profile.id);
                break;
            }
            if is_last {
                self.global_outbounds.insert(profile.id, tag_out.clone());
            }

            past = Some(self.build_hop_outbound(
                &chain_tag,
                profile,
                past.as_ref(),
                tag_out,
                is_last,
                &mut external,
            )?);
        }

        self.external_index.push(external);
        let mut members: Vec<i64> = Vec::new();
        for id in list.iter().map(|p| p.id).chain(std::iter::once(entity.id)) {
            if !members.contains(&id) {
                members.push(id);
            }
        }
        self.traffic_map.insert(chain_tag_out.clone(), members);
        Ok(chain_tag_out)
    }

    /// 前一跳经由 `tag_out` 出去：外部插件走映射入站的路由规则，内部协议直接设置 detour
    fn link(&mut self, past: &PastHop, tag_out: &str) {
        match &past.mapped_inbound {
            Some(inbound) => self.link_rules.push(
                RouteRuleDefault {
                    inbound: Some(vec![inbound.clone()]),
                    action: Some(ACTION_ROUTE.to_string()),
                    outbound: Some(tag_out.to_string()),
                    ..Default::default()
                }
                .into(),
            ),
            None => {
                if let Some(outbound) = self.outbounds.get_mut(past.outbound_index) {
                    outbound.detour = Some(tag_out.to_string());
                }
            }
        }
    }

    fn build_hop_outbound(
        &mut self,
        chain_tag: &str,
        profile: &Profile,
        past: Option<&PastHop>,
        tag: String,
        is_last: bool,
        external: &mut ExternalChain,
    ) -> Result<PastHop, BuildError> {
        let bean = &profile.bean;
        let common = bean.common();

        let (mut outbound, local_port) = if profile.needs_external() {
            let port = self.allocate_port()?;
            let socks = SocksOutbound {
                server: LOCALHOST4.to_string(),
                server_port: port,
                version: Some("5".to_string()),
                ..Default::default()
            };
            (Outbound::new(tag, OutboundKind::Socks(socks)), Some(port))
        } else {
            let mut outbound = Outbound::new(tag, build_hop(profile.id, bean)?);
            outbound.domain_resolver = Some(self.outbound_resolver());
            (outbound, None)
        };
        outbound.udp_over_tcp = bean.udp_over_tcp();

        if let Some(past) = past {
            let strategy = self.settings.domain_strategy("server");
            if !strategy.is_empty() && !is_ip_address(&past.server_address) {
                self.force_direct.insert(past.server_address.clone());
            }
        }

        if !common.custom_outbound_json.trim().is_empty() {
            let overrides = serde_json::from_str(&common.custom_outbound_json).map_err(
                |source| BuildError::InvalidCustomJson {
                    id: profile.id,
                    source,
                },
            )?;
            outbound.overrides = Some(overrides);
        }

        let mut mapped_inbound = None;
        if let Some(local_port) = local_port {
            let mut final_address = common.server_address.clone();
            let mut final_port = common.server_port;
            if bean.can_mapping() {
                let mapped = self.mapping_inbound(chain_tag, profile, is_last)?;
                final_address = LOCALHOST4.to_string();
                final_port = mapped.port;
                mapped_inbound = Some(mapped.tag);
            }
            external.entries.push(ExternalHop {
                local_port,
                profile: profile.clone(),
                final_address,
                final_port,
            });
        }

        self.outbounds.push(outbound);
        Ok(PastHop {
            outbound_index: self.outbounds.len() - 1,
            mapped_inbound,
            server_address: common.server_address.clone(),
        })
    }

    /// 为外部插件分配映射入站；最先连接的一跳按服务器地址复用
    fn mapping_inbound(
        &mut self,
        chain_tag: &str,
        profile: &Profile,
        is_last: bool,
    ) -> Result<MappedInbound, BuildError> {
        let common = profile.bean.common();
        let key = (common.server_address.clone(), common.server_port);
        if is_last {
            if let Some(mapped) = self.mappings.get(&key) {
                return Ok(mapped.clone());
            }
        }

        let port = self.allocate_port()?;
        let tag = self.unique_hop_tag(&format!("{}-mapping-{}", chain_tag, profile.id));
        self.mapping_inbounds.push(Inbound {
            tag: tag.clone(),
            kind: InboundKind::Direct(DirectInbound {
                listen: LOCALHOST4.to_string(),
                listen_port: port,
                override_address: Some(common.server_address.clone()),
                override_port: Some(common.server_port),
            }),
        });

        let mapped = MappedInbound { tag, port };
        if is_last {
            self.link_rules.push(
                RouteRuleDefault {
                    inbound: Some(vec![mapped.tag.clone()]),
                    action: Some(ACTION_ROUTE.to_string()),
                    outbound: Some(TAG_DIRECT.to_string()),
                    ..Default::default()
                }
                .into(),
            );
            self.mappings.insert(key, mapped.clone());
        }
        Ok(mapped)
    }

    /// 代理集合：每个成员单独成为全局 outbound，集合本身为 selector 或 urltest
    fn build_proxy_set(
        &mut self,
        chain_id: i64,
        entity: &Profile,
        list: &[Profile],
    ) -> Result<String, BuildError> {
        let Some((set_profile, members)) = list.split_last() else {
            return Err(BuildError::InvalidConfig(format!(
                "profile {} resolves to no proxy",
                entity.id
            )));
        };
        let ProxyBean::ProxySet(set) = &set_profile.bean else {
            return Err(BuildError::InvalidConfig(format!(
                "profile {} is not a proxy set",
                set_profile.id
            )));
        };

        if let Some(tag) = self.global_outbounds.get(&set_profile.id) {
            return Ok(tag.clone());
        }
        let set_tag = if self.build_selector {
            self.selector_name(&set_profile.display_name())
        } else if chain_id == 0 {
            TAG_PROXY.to_string()
        } else {
            format!("g-{}", set_profile.id)
        };
        self.global_outbounds.insert(set_profile.id, set_tag.clone());

        let chain_tag = format!("c-{}", chain_id);
        let mut external = ExternalChain::default();
        let mut member_tags: Vec<String> = Vec::new();
        for member in members {
            let tag = match self.global_outbounds.get(&member.id) {
                Some(tag) => tag.clone(),
                None => {
                    let tag = format!("g-{}", member.id);
                    self.global_outbounds.insert(member.id, tag.clone());
                    self.bypass_beans.push(member.bean.clone());
                    self.build_hop_outbound(
                        &chain_tag,
                        member,
                        None,
                        tag.clone(),
                        true,
                        &mut external,
                    )?;
                    self.traffic_map.insert(tag.clone(), vec![member.id]);
                    tag
                }
            };
            if !member_tags.contains(&tag) {
                member_tags.push(tag);
            }
        }

        let kind = match set.management {
            SetManagement::Selector => OutboundKind::Selector(SelectorOutbound {
                default_outbound: member_tags.first().cloned(),
                outbounds: member_tags,
                interrupt_exist_connections: set.interrupt_exist_connections,
            }),
            SetManagement::UrlTest => OutboundKind::UrlTest(UrlTestOutbound {
                outbounds: member_tags,
                url: set.test_url.clone(),
                interval: set.test_interval.clone(),
                tolerance: set.test_tolerance,
                idle_timeout: set.test_idle_timeout.clone(),
                interrupt_exist_connections: set.interrupt_exist_connections,
            }),
        };
        let mut outbound = Outbound::new(set_tag.clone(), kind);
        if !set.common.custom_outbound_json.trim().is_empty() {
            let overrides = serde_json::from_str(&set.common.custom_outbound_json).map_err(
                |source| BuildError::InvalidCustomJson {
                    id: set_profile.id,
                    source,
                },
            )?;
            outbound.overrides = Some(overrides);
        }
        self.outbounds.push(outbound);
        self.external_index.push(external);

        let mut seen = HashSet::new();
        let mut ids: Vec<i64> = members
            .iter()
            .map(|p| p.id)
            .filter(|id| seen.insert(*id))
            .collect();
        ids.push(set_profile.id);
        self.traffic_map.insert(set_tag.clone(), ids);
        Ok(set_tag)
    }

    /// 中间跳与映射入站的 tag，重复时追加序号
    fn unique_hop_tag(&mut self, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut count = 0;
        while !self.hop_tags.insert(candidate.clone()) {
            count += 1;
            candidate = format!("{}-{}", base, count);
        }
        candidate
    }

    /// 选择器模式下用节点名作为 tag，重名时追加序号
    pub(super) fn selector_name(&mut self, name: &str) -> String {
        let mut candidate = name.to_string();
        let mut count = 0;
        while self.selector_names.contains(&candidate) {
            count += 1;
            candidate = format!("{}-{}", name, count);
        }
        self.selector_names.insert(candidate.clone());
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::super::builder::{ConfigBuilder, TAG_DNS_DIRECT};
    use crate::error::BuildError;
    use crate::models::{
        BuildSettings, ChainBean, NaiveBean, Profile, ProxyBean, ProxyGroup, ProxySetBean,
        ServerCommon, SetManagement, SetSource, SocksBean,
    };
    use crate::store::{MemoryStore, ProfileStore};
    use crate::models::RuleEntity;
    use crate::utils::{LocalPortAllocator, SequentialPortAllocator};
    use serde_json::Value;
    use std::collections::HashSet;

    fn socks(store: &MemoryStore, group_id: i64, name: &str, host: &str) -> Profile {
        store
            .insert_profile(Profile::new(
                group_id,
                ProxyBean::Socks(SocksBean {
                    common: ServerCommon::new(host, 1080).with_name(name),
                    ..Default::default()
                }),
            ))
            .unwrap()
    }

    fn naive(store: &MemoryStore, group_id: i64, host: &str) -> Profile {
        store
            .insert_profile(Profile::new(
                group_id,
                ProxyBean::Naive(NaiveBean {
                    common: ServerCommon::new(host, 443),
                    ..Default::default()
                }),
            ))
            .unwrap()
    }

    fn chain(store: &MemoryStore, group_id: i64, proxies: Vec<i64>) -> Profile {
        store
            .insert_profile(Profile::new(
                group_id,
                ProxyBean::Chain(ChainBean {
                    proxies,
                    ..Default::default()
                }),
            ))
            .unwrap()
    }

    fn outbound<'a>(config: &'a Value, tag: &str) -> &'a Value {
        config["outbounds"]
            .as_array()
            .and_then(|list| list.iter().find(|o| o["tag"] == tag))
            .unwrap_or_else(|| panic!("outbound {} not found", tag))
    }

    #[test]
    fn test_chain_detour() {
        let store = MemoryStore::new();
        let p1 = socks(&store, 1, "p1", "1.1.1.1");
        let p2 = socks(&store, 1, "p2", "2.2.2.2");
        let c = chain(&store, 1, vec![p2.id, p1.id]);

        let settings = BuildSettings::default();
        let ports = SequentialPortAllocator::new(30000);
        let result = ConfigBuilder::new(&store, &settings, &ports)
            .build(&c)
            .unwrap();
        let config = &result.config;

        // p2 先连接，p1 是出口
        let exit = outbound(config, "proxy");
        assert_eq!(exit["server"], "1.1.1.1");
        assert_eq!(exit["detour"], format!("g-{}", p2.id));
        let entry = outbound(config, &format!("g-{}", p2.id));
        assert_eq!(entry["server"], "2.2.2.2");
        assert!(entry.get("detour").is_none());
        assert_eq!(entry["domain_resolver"]["server"], TAG_DNS_DIRECT);
        assert_eq!(result.traffic_map["proxy"], vec![p1.id, p2.id, c.id]);
    }

    #[test]
    fn test_shared_entry_hop_reused() {
        let store = MemoryStore::new();
        let entry = socks(&store, 1, "entry", "9.9.9.9");
        let a = socks(&store, 1, "a", "1.1.1.1");
        let b = socks(&store, 1, "b", "2.2.2.2");
        let c1 = chain(&store, 1, vec![entry.id, a.id]);
        let c2 = chain(&store, 1, vec![entry.id, b.id]);
        let rule = crate::models::RuleEntity {
            domains: "domain:example.org".to_string(),
            outbound: c2.id,
            ..Default::default()
        };
        store.insert_rule(rule).unwrap();

        let settings = BuildSettings::default();
        let ports = SequentialPortAllocator::new(30000);
        let result = ConfigBuilder::new(&store, &settings, &ports)
            .build(&c1)
            .unwrap();
        let config = &result.config;

        let entry_tag = format!("g-{}", entry.id);
        let count = config["outbounds"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|o| o["tag"] == entry_tag.as_str())
            .count();
        assert_eq!(count, 1);
        assert_eq!(outbound(config, "proxy")["detour"], entry_tag);
        let second = format!("c-{}-{}", c2.id, b.id);
        assert_eq!(outbound(config, &second)["detour"], entry_tag);
        assert_eq!(result.profile_tag_map[&c2.id], second);
    }

    #[test]
    fn test_external_hop_mapping() {
        let store = MemoryStore::new();
        let n = naive(&store, 1, "naive.example.com");
        let s = socks(&store, 1, "s", "3.3.3.3");
        // naive 是出口，socks 先连接
        let c = chain(&store, 1, vec![s.id, n.id]);

        let settings = BuildSettings::default();
        let ports = SequentialPortAllocator::new(30000);
        let result = ConfigBuilder::new(&store, &settings, &ports)
            .build(&c)
            .unwrap();
        let config = &result.config;

        let exit = outbound(config, "proxy");
        assert_eq!(exit["type"], "socks");
        assert_eq!(exit["server"], "127.0.0.1");
        assert!(exit.get("domain_resolver").is_none());

        let hops = &result.external_index[0].entries;
        assert_eq!(hops.len(), 1);
        assert_eq!(hops[0].local_port, 30000);
        assert_eq!(hops[0].final_address, "127.0.0.1");
        assert_eq!(hops[0].final_port, 30001);

        let mapping = format!("c-0-mapping-{}", n.id);
        let inbound = config["inbounds"]
            .as_array()
            .unwrap()
            .iter()
            .find(|i| i["tag"] == mapping.as_str())
            .unwrap();
        assert_eq!(inbound["listen_port"], 30001);
        assert_eq!(inbound["override_address"], "naive.example.com");

        let link = config["route"]["rules"]
            .as_array()
            .unwrap()
            .iter()
            .find(|r| r["inbound"][0] == mapping.as_str())
            .unwrap();
        assert_eq!(link["outbound"], format!("g-{}", s.id));
        assert!(result.needs_external());
    }

    #[test]
    fn test_proxy_set_urltest() {
        let store = MemoryStore::new();
        let a = socks(&store, 2, "a", "1.1.1.1");
        let b = socks(&store, 2, "b", "2.2.2.2");
        let set = store
            .insert_profile(Profile::new(
                1,
                ProxyBean::ProxySet(ProxySetBean {
                    management: SetManagement::UrlTest,
                    source: SetSource::Group {
                        group_id: 2,
                        filter_not_regex: String::new(),
                    },
                    ..Default::default()
                }),
            ))
            .unwrap();

        let settings = BuildSettings::default();
        let ports = SequentialPortAllocator::new(30000);
        let result = ConfigBuilder::new(&store, &settings, &ports)
            .build(&set)
            .unwrap();
        let config = &result.config;

        let proxy = outbound(config, "proxy");
        assert_eq!(proxy["type"], "urltest");
        let expected = vec![format!("g-{}", a.id), format!("g-{}", b.id)];
        assert_eq!(proxy["outbounds"], serde_json::json!(expected));
        assert_eq!(proxy["tolerance"], 50);
        assert_eq!(outbound(config, &expected[0])["server"], "1.1.1.1");
        assert_eq!(result.traffic_map["proxy"], vec![a.id, b.id, set.id]);
    }

    #[test]
    fn test_selector_group_names() {
        let store = MemoryStore::new();
        let mut group = ProxyGroup::new("sel");
        group.is_selector = true;
        let group = store.insert_group(group).unwrap();
        let a = socks(&store, group.id, "HK", "1.1.1.1");
        let b = socks(&store, group.id, "HK", "2.2.2.2");
        let c = socks(&store, group.id, "direct", "3.3.3.3");

        let settings = BuildSettings::default();
        let ports = SequentialPortAllocator::new(30000);
        let result = ConfigBuilder::new(&store, &settings, &ports)
            .build(&b)
            .unwrap();
        let config = &result.config;

        let selector = &config["outbounds"][0];
        assert_eq!(selector["tag"], "proxy");
        assert_eq!(selector["type"], "selector");
        assert_eq!(
            selector["outbounds"],
            serde_json::json!(["HK", "HK-1", "direct-1"])
        );
        assert_eq!(selector["default"], "HK-1");
        assert_eq!(result.selector_group_id, Some(group.id));
        assert_eq!(result.profile_tag_map[&a.id], "HK");
        assert_eq!(result.profile_tag_map[&c.id], "direct-1");
    }

    #[test]
    fn test_bad_custom_outbound() {
        let store = MemoryStore::new();
        let mut p = socks(&store, 1, "p", "1.1.1.1");
        p.bean.common_mut().custom_outbound_json = "not json".to_string();
        store.update_profile(&p).unwrap();

        let settings = BuildSettings::default();
        let ports = SequentialPortAllocator::new(30000);
        let err = ConfigBuilder::new(&store, &settings, &ports)
            .build(&p)
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidCustomJson { id, .. } if id == p.id));
    }

    #[test]
    fn test_repeated_hop_gets_unique_tags() {
        let store = MemoryStore::new();
        let root = socks(&store, 1, "root", "9.9.9.9");
        let a = socks(&store, 1, "a", "1.1.1.1");
        let b = socks(&store, 1, "b", "2.2.2.2");
        let c = chain(&store, 1, vec![b.id, a.id, a.id]);
        store
            .insert_rule(RuleEntity {
                domains: "domain:example.org".to_string(),
                outbound: c.id,
                ..Default::default()
            })
            .unwrap();

        let settings = BuildSettings::default();
        let ports = SequentialPortAllocator::new(30000);
        let result = ConfigBuilder::new(&store, &settings, &ports)
            .build(&root)
            .unwrap();
        let outbounds = result.config["outbounds"].as_array().unwrap();

        let mut seen = HashSet::new();
        for o in outbounds {
            let tag = o["tag"].as_str().unwrap();
            assert!(seen.insert(tag.to_string()), "duplicate tag {}", tag);
            assert_ne!(o["detour"].as_str(), Some(tag));
        }

        let first = format!("c-{}-{}", c.id, a.id);
        let second = format!("{}-1", first);
        assert_eq!(result.profile_tag_map[&c.id], first);
        assert_eq!(outbound(&result.config, &first)["detour"], second.as_str());
        assert_eq!(
            outbound(&result.config, &second)["detour"],
            format!("g-{}", b.id)
        );
        assert_eq!(result.traffic_map[&first], vec![a.id, b.id, c.id]);
    }

    #[test]
    fn test_proxy_set_traffic_ids_unique() {
        let store = MemoryStore::new();
        let a = socks(&store, 2, "a", "1.1.1.1");
        let b = socks(&store, 2, "b", "2.2.2.2");
        let set = store
            .insert_profile(Profile::new(
                1,
                ProxyBean::ProxySet(ProxySetBean {
                    source: SetSource::List {
                        proxies: vec![a.id, b.id, a.id],
                    },
                    ..Default::default()
                }),
            ))
            .unwrap();

        let settings = BuildSettings::default();
        let ports = SequentialPortAllocator::new(30000);
        let result = ConfigBuilder::new(&store, &settings, &ports)
            .build(&set)
            .unwrap();
        assert_eq!(result.traffic_map["proxy"], vec![a.id, b.id, set.id]);
        let expected = vec![format!("g-{}", a.id), format!("g-{}", b.id)];
        assert_eq!(
            outbound(&result.config, "proxy")["outbounds"],
            serde_json::json!(expected)
        );
    }

    #[test]
    fn test_ports_released_between_builds() {
        let store = MemoryStore::new();
        let n = naive(&store, 1, "naive.example.com");
        let s = socks(&store, 1, "s", "3.3.3.3");
        let c = chain(&store, 1, vec![s.id, n.id]);

        let settings = BuildSettings::default();
        let ports = LocalPortAllocator::new();
        for _ in 0..20 {
            let mut result = ConfigBuilder::new(&store, &settings, &ports)
                .build(&c)
                .unwrap();
            assert_eq!(result.local_ports.len(), 2);
            assert_eq!(ports.in_use(), 2);
            result.release_ports(&ports);
            assert!(result.local_ports.is_empty());
        }
        assert_eq!(ports.in_use(), 0);
    }

    #[test]
    fn test_failed_build_returns_ports() {
        let store = MemoryStore::new();
        let n = naive(&store, 1, "naive.example.com");
        let mut s = socks(&store, 1, "s", "3.3.3.3");
        s.bean.common_mut().custom_outbound_json = "not json".to_string();
        store.update_profile(&s).unwrap();
        // naive 先构建并分配端口，随后 socks 出错
        let c = chain(&store, 1, vec![s.id, n.id]);

        let settings = BuildSettings::default();
        let ports = LocalPortAllocator::new();
        let err = ConfigBuilder::new(&store, &settings, &ports)
            .build(&c)
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidCustomJson { id, .. } if id == s.id));
        assert_eq!(ports.in_use(), 0);
    }

    #[test]
    fn test_build_by_id() {
        let store = MemoryStore::new();
        let p = socks(&store, 1, "p", "1.1.1.1");

        let settings = BuildSettings::default();
        let ports = SequentialPortAllocator::new(30000);
        let builder = ConfigBuilder::new(&store, &settings, &ports);
        assert_eq!(builder.build_by_id(p.id).unwrap().main_id, p.id);
        assert!(matches!(
            builder.build_by_id(9999),
            Err(BuildError::ProfileNotFound(9999))
        ));
    }
}
