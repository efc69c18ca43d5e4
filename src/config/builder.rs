//! 引擎配置构建
//!
//! 每次构建都是一次独立的计算：读取存储中的节点、分组与规则，输出完整的引擎配置。
//! 构建过程中的缓存（已生成的 outbound、端口映射等）只在本次构建内有效。

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use super::merge_json;
use crate::error::BuildError;
use crate::models::options::{
    CacheFileOptions, ClashApiOptions, DirectInbound, DnsOptions, DnsRule, DnsRuleDefault,
    DnsServer, DnsServerKind, DomainResolver, EngineConfig, ExperimentalOptions, FakeIpDns,
    HostsDns, Inbound, InboundKind, InboundUser, LocalDns, LogOptions, MixedInbound, NtpOptions,
    Outbound, OutboundKind, RouteOptions, RouteRule, RouteRuleDefault, SelectorOutbound,
    TunInbound, ACTION_HIJACK_DNS, ACTION_ROUTE, ACTION_SNIFF,
};
use crate::models::{
    BuildResult, BuildSettings, ConfigKind, DnsMode, ExternalChain, Ipv6Mode, Profile, ProxyBean,
    RuleEntity, MODE_BLOCK, MODE_DIRECT, MODE_GLOBAL,
};
use crate::rules::{build_dns_server, build_rule_sets, is_endpoint, RuleSetSource, LOCAL_DNS_SERVER};
use crate::store::ProfileStore;
use crate::utils::{is_ip_address, unwrap_ipv6_host, PortAllocator, CACHE_FILE_PATH};

pub const TAG_MIXED: &str = "mixed-in";
pub const TAG_TUN: &str = "tun-in";
pub const TAG_DNS_IN: &str = "dns-in";

pub const TAG_PROXY: &str = "proxy";
pub const TAG_DIRECT: &str = "direct";
pub const TAG_BLOCK: &str = "block";

pub const TAG_DNS_REMOTE: &str = "dns-remote";
pub const TAG_DNS_DIRECT: &str = "dns-direct";
pub const TAG_DNS_LOCAL: &str = "dns-local";
pub const TAG_DNS_FINAL: &str = "dns-final";
pub const TAG_DNS_FAKE: &str = "dns-fake";
pub const TAG_DNS_HOSTS: &str = "dns-hosts";

pub const LOCALHOST4: &str = "127.0.0.1";

/// TUN 设备地址
pub const PRIVATE_VLAN4_CLIENT: &str = "172.19.0.1";
pub const PRIVATE_VLAN4_ROUTER: &str = "172.19.0.2";
pub const PRIVATE_VLAN6_CLIENT: &str = "fdfe:dcba:9876::1";
pub const PRIVATE_VLAN6_ROUTER: &str = "fdfe:dcba:9876::2";

pub const FAKE_DNS_QUERY_TYPE: [&str; 2] = ["A", "AAAA"];

const DASHBOARD_PATH: &str = "../files/dashboard";
const LOCAL_RULE_SET_DIR: &str = "../geo";
const MULTICAST_CIDR: [&str; 2] = ["224.0.0.0/3", "ff00::/8"];

/// 构建选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// 测速用配置：不生成入站与用户规则，只使用系统 DNS
    pub for_test: bool,
    /// 导出配置：不生成分组选择器
    pub for_export: bool,
}

/// 应用包名到系统 uid 的查询
pub trait PackageResolver: Send + Sync {
    fn uid(&self, package: &str) -> Option<u32>;
}

impl PackageResolver for BTreeMap<String, u32> {
    fn uid(&self, package: &str) -> Option<u32> {
        self.get(package).copied()
    }
}

impl PackageResolver for HashMap<String, u32> {
    fn uid(&self, package: &str) -> Option<u32> {
        self.get(package).copied()
    }
}

/// 配置构建器
pub struct ConfigBuilder<'a> {
    store: &'a dyn ProfileStore,
    settings: &'a BuildSettings,
    ports: &'a dyn PortAllocator,
    packages: Option<&'a dyn PackageResolver>,
    options: BuildOptions,
}

impl<'a> ConfigBuilder<'a> {
    pub fn new(
        store: &'a dyn ProfileStore,
        settings: &'a BuildSettings,
        ports: &'a dyn PortAllocator,
    ) -> Self {
        Self {
            store,
            settings,
            ports,
            packages: None,
            options: BuildOptions::default(),
        }
    }

    pub fn options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    pub fn packages(mut self, resolver: &'a dyn PackageResolver) -> Self {
        self.packages = Some(resolver);
        self
    }

    /// 为指定节点构建配置
    pub fn build(&self, profile: &Profile) -> Result<BuildResult, BuildError> {
        if let ProxyBean::Config(bean) = &profile.bean {
            if bean.kind == ConfigKind::Full {
                return full_config_result(profile, &bean.config);
            }
        }

        log::debug!(
            "Building config for profile {} ({})",
            profile.id,
            profile.display_name()
        );
        let mut session = BuildSession::new(self);
        let result = session.run(profile);
        if result.is_err() {
            session.release_ports();
        }
        result
    }

    /// 按 id 查找节点后构建
    pub fn build_by_id(&self, id: i64) -> Result<BuildResult, BuildError> {
        let profile = self
            .store
            .get_profile(id)
            .ok_or(BuildError::ProfileNotFound(id))?;
        self.build(&profile)
    }
}

/// 便捷入口
pub fn build_config(
    store: &dyn ProfileStore,
    settings: &BuildSettings,
    ports: &dyn PortAllocator,
    profile: &Profile,
    options: BuildOptions,
) -> Result<BuildResult, BuildError> {
    ConfigBuilder::new(store, settings, ports)
        .options(options)
        .build(profile)
}

/// 完整配置直接输出，不做任何处理
fn full_config_result(profile: &Profile, config: &str) -> Result<BuildResult, BuildError> {
    let config: Value = serde_json::from_str(config).map_err(|source| {
        BuildError::InvalidCustomJson {
            id: profile.id,
            source,
        }
    })?;
    Ok(BuildResult {
        config,
        external_index: Vec::new(),
        main_id: profile.id,
        traffic_map: BTreeMap::from([(TAG_PROXY.to_string(), vec![profile.id])]),
        profile_tag_map: BTreeMap::from([(profile.id, TAG_PROXY.to_string())]),
        selector_group_id: None,
        warnings: Vec::new(),
        local_ports: Vec::new(),
    })
}

/// 映射入站：外部插件经由它回到引擎再发往真实服务器
#[derive(Debug, Clone)]
pub(super) struct MappedInbound {
    pub tag: String,
    pub port: u16,
}

/// 一次构建的全部中间状态
pub(super) struct BuildSession<'a> {
    pub store: &'a dyn ProfileStore,
    pub settings: &'a BuildSettings,
    pub ports: &'a dyn PortAllocator,
    pub packages: Option<&'a dyn PackageResolver>,
    pub options: BuildOptions,
    pub build_selector: bool,

    /// 端口映射入站，排在固定入站之后
    pub mapping_inbounds: Vec<Inbound>,
    pub outbounds: Vec<Outbound>,
    /// 链内跳转规则，排在用户规则之前
    pub link_rules: Vec<RouteRule>,
    pub traffic_map: BTreeMap<String, Vec<i64>>,
    pub tag_map: BTreeMap<i64, String>,
    /// 节点 id → 已生成的全局 outbound tag
    pub global_outbounds: HashMap<i64, String>,
    pub selector_names: HashSet<String>,
    /// 链内中间跳已使用的 tag
    pub hop_tags: HashSet<String>,
    /// 本次构建分配的本地端口
    pub local_ports: Vec<u16>,
    pub external_index: Vec<ExternalChain>,
    pub mappings: HashMap<(String, u16), MappedInbound>,
    /// 直接连接服务器的节点，其域名需走直连 DNS
    pub bypass_beans: Vec<ProxyBean>,
    pub force_direct: BTreeSet<String>,
    pub warnings: Vec<String>,
}

impl<'a> BuildSession<'a> {
    fn new(builder: &ConfigBuilder<'a>) -> Self {
        Self {
            store: builder.store,
            settings: builder.settings,
            ports: builder.ports,
            packages: builder.packages,
            options: builder.options,
            build_selector: false,
            mapping_inbounds: Vec::new(),
            outbounds: Vec::new(),
            link_rules: Vec::new(),
            traffic_map: BTreeMap::new(),
            tag_map: BTreeMap::new(),
            global_outbounds: HashMap::new(),
            // 选择器名称不能与固定 tag 冲突
            selector_names: [TAG_PROXY, TAG_DIRECT, TAG_BLOCK]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            hop_tags: HashSet::new(),
            local_ports: Vec::new(),
            external_index: Vec::new(),
            mappings: HashMap::new(),
            bypass_beans: Vec::new(),
            force_direct: BTreeSet::new(),
            warnings: Vec::new(),
        }
    }

    pub fn warn(&mut self, message: String) {
        log::warn!("{}", message);
        self.warnings.push(message);
    }

    /// 分配本地端口并记录，构建失败时全部归还
    pub fn allocate_port(&mut self) -> Result<u16, BuildError> {
        let port = self.ports.allocate()?;
        self.local_ports.push(port);
        Ok(port)
    }

    fn release_ports(&mut self) {
        for port in self.local_ports.drain(..) {
            self.ports.release(port);
        }
    }

    fn ipv6_mode(&self) -> Ipv6Mode {
        if self.options.for_test {
            Ipv6Mode::Enable
        } else {
            self.settings.ipv6_mode
        }
    }

    /// 指定 DNS 标签的解析策略，未设置时跟随 IPv6 模式
    pub fn auto_strategy(&self, tag: &str) -> String {
        let strategy = self.settings.domain_strategy(tag);
        if strategy.is_empty() {
            self.ipv6_mode().domain_strategy().to_string()
        } else {
            strategy
        }
    }

    /// outbound 解析服务器域名使用的 DNS
    pub fn outbound_resolver(&self) -> DomainResolver {
        if self.options.for_test {
            return DomainResolver {
                server: TAG_DNS_LOCAL.to_string(),
                strategy: None,
            };
        }
        let strategy = self.settings.domain_strategy("server");
        DomainResolver {
            server: TAG_DNS_DIRECT.to_string(),
            strategy: (!strategy.is_empty()).then_some(strategy),
        }
    }

    fn run(&mut self, root: &Profile) -> Result<BuildResult, BuildError> {
        let settings = self.settings;
        let for_test = self.options.for_test;
        let group = self.store.get_group(root.group_id);
        self.build_selector =
            !for_test && !self.options.for_export && group.as_ref().is_some_and(|g| g.is_selector);

        let rules: Vec<RuleEntity> = if for_test {
            Vec::new()
        } else {
            self.store.enabled_rules()
        };

        let mut config = EngineConfig {
            log: Some(LogOptions {
                level: settings.log_level_name().to_string(),
                timestamp: true,
            }),
            ..Default::default()
        };
        if !for_test {
            config.experimental = Some(self.experimental());
        }
        if settings.ntp_enable {
            config.ntp = Some(self.ntp());
        }

        // 主出口
        let selector_group = if self.build_selector { group } else { None };
        let main_tag = match selector_group {
            Some(group) => {
                let mut tags = Vec::new();
                for profile in self.store.profiles_by_group(group.id) {
                    let tag = self.build_chain(profile.id, &profile)?;
                    self.tag_map.insert(profile.id, tag.clone());
                    tags.push(tag);
                }
                let selector = SelectorOutbound {
                    outbounds: tags,
                    default_outbound: self.tag_map.get(&root.id).cloned(),
                    interrupt_exist_connections: false,
                };
                self.outbounds
                    .insert(0, Outbound::new(TAG_PROXY, OutboundKind::Selector(selector)));
                TAG_PROXY.to_string()
            }
            None => {
                let tag = self.build_chain(0, root)?;
                self.tag_map.insert(root.id, tag.clone());
                tag
            }
        };

        // 规则中引用的节点各自成链
        let extra: BTreeSet<i64> = rules
            .iter()
            .map(|r| r.outbound)
            .filter(|&id| id > 0 && id != root.id)
            .collect();
        let extra: Vec<i64> = extra.into_iter().collect();
        for profile in self.store.get_profiles(&extra) {
            if self.tag_map.contains_key(&profile.id) {
                continue;
            }
            let tag = self.build_chain(profile.id, &profile)?;
            self.tag_map.insert(profile.id, tag);
        }

        let (user_dns_rules, user_route_rules) = self.compile_rules(&rules, root.id);

        if !for_test {
            config.inbounds = self.inbounds();
        }
        config.inbounds.append(&mut self.mapping_inbounds);

        self.outbounds.push(Outbound::direct(TAG_DIRECT));
        self.outbounds.push(Outbound::block(TAG_BLOCK));

        self.collect_bypass_domains();
        config.dns = Some(self.dns(user_dns_rules)?);
        config.route = Some(self.route(&main_tag, user_route_rules));

        let remote_urls = settings.rule_set_provider.remote_urls();
        let local_dir = if settings.external_assets.trim().is_empty() {
            LOCAL_RULE_SET_DIR.to_string()
        } else {
            settings.external_assets.trim_end_matches('/').to_string()
        };
        let source = match &remote_urls {
            Some((ip_url, domain_url)) => RuleSetSource::Remote {
                ip_url: ip_url.as_str(),
                domain_url: domain_url.as_str(),
            },
            None => RuleSetSource::Local { path: &local_dir },
        };
        build_rule_sets(&mut config, &source);

        let (endpoints, outbounds): (Vec<Outbound>, Vec<Outbound>) =
            std::mem::take(&mut self.outbounds)
                .into_iter()
                .partition(|o| is_endpoint(&o.type_name()));
        config.outbounds = outbounds;
        config.endpoints = endpoints;

        let mut value = serde_json::to_value(&config)
            .map_err(|e| BuildError::InvalidConfig(format!("failed to serialize config: {}", e)))?;

        let custom = &root.bean.common().custom_config_json;
        if !custom.trim().is_empty() {
            let custom: Value = serde_json::from_str(custom)
                .map_err(|source| BuildError::InvalidCustomJson { id: root.id, source })?;
            merge_json(&custom, &mut value, false);
        }

        log::info!(
            "Config built for profile {}: {} outbounds, {} warnings",
            root.id,
            config.outbounds.len() + config.endpoints.len(),
            self.warnings.len()
        );

        Ok(BuildResult {
            config: value,
            external_index: std::mem::take(&mut self.external_index),
            main_id: root.id,
            traffic_map: std::mem::take(&mut self.traffic_map),
            profile_tag_map: std::mem::take(&mut self.tag_map),
            selector_group_id: self.build_selector.then_some(root.group_id),
            warnings: std::mem::take(&mut self.warnings),
            local_ports: std::mem::take(&mut self.local_ports),
        })
    }

    fn experimental(&self) -> ExperimentalOptions {
        let listen = self.settings.clash_api_listen.trim();
        ExperimentalOptions {
            clash_api: (!listen.is_empty()).then(|| ClashApiOptions {
                external_controller: listen.to_string(),
                external_ui: Some(DASHBOARD_PATH.to_string()),
                default_mode: None,
            }),
            cache_file: Some(CacheFileOptions {
                enabled: true,
                store_fakeip: true,
                path: CACHE_FILE_PATH.to_string(),
            }),
        }
    }

    fn ntp(&mut self) -> NtpOptions {
        let server = self.settings.ntp_address.trim().to_string();
        if !is_ip_address(&server) {
            self.force_direct.insert(server.clone());
        }
        NtpOptions {
            enabled: true,
            server,
            server_port: self.settings.ntp_port,
            interval: self.settings.ntp_interval.clone(),
            detour: None,
        }
    }

    fn inbounds(&self) -> Vec<Inbound> {
        let settings = self.settings;
        let bind = if settings.allow_access { "::" } else { LOCALHOST4 };
        let mut inbounds = vec![Inbound {
            tag: TAG_DNS_IN.to_string(),
            kind: InboundKind::Direct(DirectInbound {
                listen: bind.to_string(),
                listen_port: settings.local_dns_port,
                override_address: Some("8.8.8.8".to_string()),
                override_port: Some(53),
            }),
        }];

        if settings.is_vpn() {
            let v4 = format!("{}/30", PRIVATE_VLAN4_CLIENT);
            let v6 = format!("{}/126", PRIVATE_VLAN6_CLIENT);
            let address = match settings.ipv6_mode {
                Ipv6Mode::Disable => vec![v4],
                Ipv6Mode::Only => vec![v6],
                _ => vec![v4, v6],
            };
            inbounds.push(Inbound {
                tag: TAG_TUN.to_string(),
                kind: InboundKind::Tun(TunInbound {
                    address,
                    mtu: settings.mtu,
                    stack: settings.tun_stack.clone(),
                    auto_route: true,
                    endpoint_independent_nat: true,
                }),
            });
        }

        let users = if settings.inbound_username.is_empty() && settings.inbound_password.is_empty()
        {
            Vec::new()
        } else {
            vec![InboundUser {
                username: settings.inbound_username.clone(),
                password: settings.inbound_password.clone(),
            }]
        };
        inbounds.push(Inbound {
            tag: TAG_MIXED.to_string(),
            kind: InboundKind::Mixed(MixedInbound {
                listen: bind.to_string(),
                listen_port: settings.mixed_port,
                users,
            }),
        });
        inbounds
    }

    /// 直连节点的服务器域名与远程 DNS 的域名必须用直连 DNS 解析，否则会回环
    fn collect_bypass_domains(&mut self) {
        for bean in std::mem::take(&mut self.bypass_beans) {
            let address = match &bean {
                ProxyBean::Config(config) => serde_json::from_str::<Value>(&config.config)
                    .ok()
                    .and_then(|v| v.get("server").and_then(|s| s.as_str()).map(str::to_string))
                    .unwrap_or_default(),
                other => other.common().server_address.clone(),
            };
            if !address.is_empty() && !is_ip_address(&address) {
                self.force_direct.insert(address);
            }
        }

        for link in self.settings.remote_dns_list() {
            let address = link.split_once("://").map_or(link.as_str(), |(_, rest)| rest);
            let Ok(url) = url::Url::parse(&format!("https://{}", address)) else {
                continue;
            };
            if let Some(host) = url.host_str() {
                let host = unwrap_ipv6_host(host);
                if !host.is_empty() && !is_ip_address(host) {
                    self.force_direct.insert(host.to_string());
                }
            }
        }
    }

    fn dns(&mut self, user_rules: Vec<DnsRule>) -> Result<DnsOptions, BuildError> {
        let settings = self.settings;
        if self.options.for_test {
            return Ok(DnsOptions {
                servers: vec![DnsServer {
                    tag: TAG_DNS_LOCAL.to_string(),
                    kind: DnsServerKind::Local(LocalDns {}),
                }],
                rules: Vec::new(),
                final_server: Some(TAG_DNS_LOCAL.to_string()),
                independent_cache: true,
                ..Default::default()
            });
        }

        let remote = settings.remote_dns_list();
        let direct = settings.direct_dns_list();
        let underlying = settings.underlying_dns_list();
        let remote_link = remote.first().ok_or(BuildError::NoRemoteDns)?;
        let direct_link = direct.first().ok_or(BuildError::NoDirectDns)?;
        let fake_dns = settings.dns_mode == DnsMode::FakeDns;
        let subnet = settings.direct_dns_client_subnet.trim();

        let resolver = |server: &str| DomainResolver {
            server: server.to_string(),
            strategy: None,
        };

        let mut servers = vec![
            build_dns_server(
                remote_link,
                None,
                TAG_DNS_REMOTE,
                Some(resolver(TAG_DNS_DIRECT)),
            )?,
            build_dns_server(direct_link, None, TAG_DNS_DIRECT, Some(resolver(TAG_DNS_LOCAL)))?,
        ];

        if !fake_dns {
            let link = match settings.dns_mode {
                DnsMode::Leak => direct_link,
                DnsMode::Precise => {
                    if subnet.is_empty() {
                        return Err(BuildError::NoClientSubnet);
                    }
                    remote_link
                }
                _ => remote_link,
            };
            servers.push(build_dns_server(
                link,
                None,
                TAG_DNS_FINAL,
                Some(resolver(TAG_DNS_LOCAL)),
            )?);
        }

        let underlying_link = underlying
            .first()
            .map_or(LOCAL_DNS_SERVER, String::as_str);
        servers.push(build_dns_server(underlying_link, None, TAG_DNS_LOCAL, None)?);

        let mut rules: Vec<DnsRule> = Vec::new();

        let hosts = settings.hosts();
        if !hosts.is_empty() {
            rules.push(
                DnsRuleDefault {
                    domain: Some(hosts.keys().cloned().collect()),
                    server: Some(TAG_DNS_HOSTS.to_string()),
                    ..Default::default()
                }
                .into(),
            );
            servers.push(DnsServer {
                tag: TAG_DNS_HOSTS.to_string(),
                kind: DnsServerKind::Hosts(HostsDns { predefined: hosts }),
            });
        }

        if !self.force_direct.is_empty() {
            rules.push(
                DnsRuleDefault {
                    domain: Some(self.force_direct.iter().cloned().collect()),
                    server: Some(TAG_DNS_DIRECT.to_string()),
                    strategy: Some(self.auto_strategy(TAG_DNS_DIRECT)),
                    ..Default::default()
                }
                .into(),
            );
        }

        for (mode, server) in [(MODE_GLOBAL, TAG_DNS_REMOTE), (MODE_DIRECT, TAG_DNS_DIRECT)] {
            rules.push(
                DnsRuleDefault {
                    clash_mode: Some(mode.to_string()),
                    server: Some(server.to_string()),
                    ..Default::default()
                }
                .into(),
            );
        }

        if settings.enable_dns_routing {
            rules.extend(user_rules);
        }

        if fake_dns {
            servers.push(DnsServer {
                tag: TAG_DNS_FAKE.to_string(),
                kind: DnsServerKind::FakeIp(FakeIpDns {
                    inet4_range: "198.18.0.0/15".to_string(),
                    inet6_range: "fc00::/18".to_string(),
                }),
            });
            rules.push(
                DnsRuleDefault {
                    inbound: Some(vec![TAG_TUN.to_string()]),
                    query_type: Some(FAKE_DNS_QUERY_TYPE.iter().map(|s| s.to_string()).collect()),
                    server: Some(TAG_DNS_FAKE.to_string()),
                    disable_cache: Some(true),
                    ..Default::default()
                }
                .into(),
            );
        }

        Ok(DnsOptions {
            servers,
            rules,
            final_server: Some(if fake_dns { TAG_DNS_REMOTE } else { TAG_DNS_FINAL }.to_string()),
            strategy: Some(self.auto_strategy(TAG_DNS_REMOTE)),
            client_subnet: (!subnet.is_empty()).then(|| subnet.to_string()),
            independent_cache: true,
        })
    }

    /// 路由规则顺序：嗅探、DNS 劫持、Clash 模式、链内跳转、用户规则、局域网与组播
    fn route(&mut self, main_tag: &str, user_rules: Vec<RouteRule>) -> RouteOptions {
        let settings = self.settings;
        let mut rules: Vec<RouteRule> = Vec::new();

        if !self.options.for_test {
            if settings.traffic_sniffing > 0 {
                rules.push(
                    RouteRuleDefault {
                        action: Some(ACTION_SNIFF.to_string()),
                        ..Default::default()
                    }
                    .into(),
                );
            }
            rules.push(
                RouteRuleDefault {
                    inbound: Some(vec![TAG_DNS_IN.to_string()]),
                    action: Some(ACTION_HIJACK_DNS.to_string()),
                    ..Default::default()
                }
                .into(),
            );
            if settings.is_vpn() {
                rules.push(
                    RouteRuleDefault {
                        ip_cidr: Some(vec![
                            format!("{}/32", PRIVATE_VLAN4_ROUTER),
                            format!("{}/128", PRIVATE_VLAN6_ROUTER),
                        ]),
                        port: Some(vec![53]),
                        action: Some(ACTION_HIJACK_DNS.to_string()),
                        ..Default::default()
                    }
                    .into(),
                );
            }
            for (mode, outbound) in [
                (MODE_GLOBAL, TAG_PROXY),
                (MODE_DIRECT, TAG_DIRECT),
                (MODE_BLOCK, TAG_BLOCK),
            ] {
                rules.push(route_to(
                    RouteRuleDefault {
                        clash_mode: Some(mode.to_string()),
                        ..Default::default()
                    },
                    outbound,
                ));
            }
        }

        rules.append(&mut self.link_rules);
        rules.extend(user_rules);

        if !self.options.for_test {
            if settings.bypass_lan_in_core {
                rules.push(route_to(
                    RouteRuleDefault {
                        ip_is_private: Some(true),
                        ..Default::default()
                    },
                    TAG_DIRECT,
                ));
            }
            let multicast: Vec<String> = MULTICAST_CIDR.iter().map(|s| s.to_string()).collect();
            rules.push(route_to(
                RouteRuleDefault {
                    ip_cidr: Some(multicast.clone()),
                    source_ip_cidr: Some(multicast),
                    ..Default::default()
                },
                TAG_BLOCK,
            ));
        }

        RouteOptions {
            rules,
            rule_set: None,
            final_outbound: Some(main_tag.to_string()),
            auto_detect_interface: Some(true),
        }
    }
}

/// 路由到指定 outbound 的规则
pub(super) fn route_to(mut rule: RouteRuleDefault, outbound: &str) -> RouteRule {
    rule.action = Some(ACTION_ROUTE.to_string());
    rule.outbound = Some(outbound.to_string());
    rule.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConfigBean, ProxyGroup, ServerCommon, ShadowsocksBean};
    use crate::store::MemoryStore;
    use crate::utils::SequentialPortAllocator;

    fn setup() -> (MemoryStore, Profile) {
        let store = MemoryStore::new();
        let group = store.insert_group(ProxyGroup::new("g")).unwrap();
        let profile = store
            .insert_profile(Profile::new(
                group.id,
                ProxyBean::Shadowsocks(ShadowsocksBean {
                    common: ServerCommon::new("ss.example.com", 8388),
                    method: "aes-128-gcm".to_string(),
                    password: "pw".to_string(),
                    ..Default::default()
                }),
            ))
            .unwrap();
        (store, profile)
    }

    fn tags(config: &Value, section: &str) -> Vec<String> {
        config[section]
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|o| o["tag"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn test_full_config_short_circuit() {
        let store = MemoryStore::new();
        let mut profile = Profile::new(
            1,
            ProxyBean::Config(ConfigBean {
                config: r#"{"outbounds": [{"type": "direct", "tag": "x"}]}"#.to_string(),
                ..Default::default()
            }),
        );
        profile.id = 5;
        let settings = BuildSettings::default();
        let ports = SequentialPortAllocator::new(20000);
        let result = build_config(&store, &settings, &ports, &profile, BuildOptions::default())
            .unwrap();
        assert_eq!(result.config["outbounds"][0]["tag"], "x");
        assert_eq!(result.traffic_map[TAG_PROXY], vec![5]);
        assert_eq!(result.profile_tag_map[&5], TAG_PROXY);
    }

    #[test]
    fn test_basic_structure() {
        let (store, profile) = setup();
        let settings = BuildSettings::default();
        let ports = SequentialPortAllocator::new(20000);
        let result = ConfigBuilder::new(&store, &settings, &ports)
            .build(&profile)
            .unwrap();
        let config = &result.config;

        assert_eq!(tags(config, "inbounds"), vec![TAG_DNS_IN, TAG_TUN, TAG_MIXED]);
        assert_eq!(tags(config, "outbounds"), vec![TAG_PROXY, TAG_DIRECT, TAG_BLOCK]);
        assert_eq!(config["outbounds"][0]["domain_resolver"]["server"], TAG_DNS_DIRECT);
        assert_eq!(config["route"]["final"], TAG_PROXY);
        assert_eq!(config["dns"]["final"], TAG_DNS_FINAL);
        assert_eq!(config["log"]["level"], "warn");
        assert_eq!(result.traffic_map[TAG_PROXY], vec![profile.id]);

        // 服务器域名与远程 DNS 域名走直连 DNS
        assert_eq!(
            config["dns"]["rules"][0]["domain"],
            serde_json::json!(["dns.google", "ss.example.com"])
        );
        assert_eq!(config["dns"]["rules"][0]["server"], TAG_DNS_DIRECT);
        assert_eq!(config["route"]["rules"][0]["action"], ACTION_SNIFF);
        assert_eq!(config["route"]["rules"][1]["action"], ACTION_HIJACK_DNS);
    }

    #[test]
    fn test_test_build_is_minimal() {
        let (store, profile) = setup();
        let settings = BuildSettings::default();
        let ports = SequentialPortAllocator::new(20000);
        let result = ConfigBuilder::new(&store, &settings, &ports)
            .options(BuildOptions {
                for_test: true,
                for_export: false,
            })
            .build(&profile)
            .unwrap();
        let config = &result.config;
        assert!(config.get("inbounds").is_none());
        assert!(config.get("experimental").is_none());
        assert_eq!(tags(&config["dns"], "servers"), vec![TAG_DNS_LOCAL]);
        assert_eq!(config["outbounds"][0]["domain_resolver"]["server"], TAG_DNS_LOCAL);
        assert!(config["route"]["rules"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_dns_errors() {
        let (store, profile) = setup();
        let ports = SequentialPortAllocator::new(20000);

        let settings = BuildSettings {
            remote_dns: "# only a comment".to_string(),
            ..Default::default()
        };
        let err = ConfigBuilder::new(&store, &settings, &ports)
            .build(&profile)
            .unwrap_err();
        assert!(matches!(err, BuildError::NoRemoteDns));

        let settings = BuildSettings {
            direct_dns: String::new(),
            ..Default::default()
        };
        let err = ConfigBuilder::new(&store, &settings, &ports)
            .build(&profile)
            .unwrap_err();
        assert!(matches!(err, BuildError::NoDirectDns));

        let settings = BuildSettings {
            dns_mode: DnsMode::Precise,
            ..Default::default()
        };
        let err = ConfigBuilder::new(&store, &settings, &ports)
            .build(&profile)
            .unwrap_err();
        assert!(matches!(err, BuildError::NoClientSubnet));
    }

    #[test]
    fn test_fake_dns() {
        let (store, profile) = setup();
        let settings = BuildSettings {
            dns_mode: DnsMode::FakeDns,
            ..Default::default()
        };
        let ports = SequentialPortAllocator::new(20000);
        let result = ConfigBuilder::new(&store, &settings, &ports)
            .build(&profile)
            .unwrap();
        let dns = &result.config["dns"];
        let servers = tags(dns, "servers");
        assert!(servers.contains(&TAG_DNS_FAKE.to_string()));
        assert!(!servers.contains(&TAG_DNS_FINAL.to_string()));
        assert_eq!(dns["final"], TAG_DNS_REMOTE);
        let last = dns["rules"].as_array().unwrap().last().unwrap();
        assert_eq!(last["server"], TAG_DNS_FAKE);
        assert_eq!(last["query_type"], serde_json::json!(["A", "AAAA"]));
    }

    #[test]
    fn test_custom_config_merged_last() {
        let store = MemoryStore::new();
        let profile = store
            .insert_profile(Profile::new(
                1,
                ProxyBean::Shadowsocks(ShadowsocksBean {
                    common: ServerCommon {
                        server_address: "1.1.1.1".to_string(),
                        server_port: 443,
                        custom_config_json: r#"{"log": {"level": "debug"}, "route": {"final": "direct"}}"#
                            .to_string(),
                        custom_outbound_json: r#"{"tcp_fast_open": true}"#.to_string(),
                        ..Default::default()
                    },
                    ..Default::default()
                }),
            ))
            .unwrap();
        let settings = BuildSettings::default();
        let ports = SequentialPortAllocator::new(20000);
        let result = ConfigBuilder::new(&store, &settings, &ports)
            .build(&profile)
            .unwrap();
        assert_eq!(result.config["log"]["level"], "debug");
        assert_eq!(result.config["log"]["timestamp"], true);
        assert_eq!(result.config["route"]["final"], TAG_DIRECT);
        assert_eq!(result.config["outbounds"][0]["tcp_fast_open"], true);

        let mut broken = profile.clone();
        broken.bean.common_mut().custom_config_json = "{".to_string();
        assert!(matches!(
            ConfigBuilder::new(&store, &settings, &ports).build(&broken),
            Err(BuildError::InvalidCustomJson { .. })
        ));
    }
}
