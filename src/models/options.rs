//! 引擎配置结构
//!
//! 生成的 JSON 直接交给代理引擎加载，字段名与引擎的配置格式保持一致，
//! 未设置的字段一律省略而不是输出空值。

use serde::ser::Error as _;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::config::merge_json;

pub const TYPE_DIRECT: &str = "direct";
pub const TYPE_BLOCK: &str = "block";
pub const TYPE_SELECTOR: &str = "selector";
pub const TYPE_URLTEST: &str = "urltest";
pub const TYPE_WIREGUARD: &str = "wireguard";

pub const RULE_SET_TYPE_REMOTE: &str = "remote";
pub const RULE_SET_TYPE_LOCAL: &str = "local";

pub const ACTION_ROUTE: &str = "route";
pub const ACTION_ROUTE_OPTIONS: &str = "route-options";
pub const ACTION_REJECT: &str = "reject";
pub const ACTION_HIJACK_DNS: &str = "hijack-dns";
pub const ACTION_SNIFF: &str = "sniff";
pub const ACTION_RESOLVE: &str = "resolve";

pub const LOGICAL_TYPE: &str = "logical";
pub const LOGICAL_OR: &str = "or";
pub const LOGICAL_AND: &str = "and";

/// 完整的引擎配置
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<LogOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ntp: Option<NtpOptions>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inbounds: Vec<Inbound>,
    pub outbounds: Vec<Outbound>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<Outbound>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<ExperimentalOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogOptions {
    pub level: String,
    pub timestamp: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NtpOptions {
    pub enabled: bool,
    pub server: String,
    pub server_port: u16,
    pub interval: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detour: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExperimentalOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clash_api: Option<ClashApiOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_file: Option<CacheFileOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClashApiOptions {
    pub external_controller: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ui: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_mode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheFileOptions {
    pub enabled: bool,
    pub store_fakeip: bool,
    pub path: String,
}

// ---------------------------------------------------------------------------
// DNS

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DnsOptions {
    pub servers: Vec<DnsServer>,
    pub rules: Vec<DnsRule>,
    #[serde(rename = "final", skip_serializing_if = "Option::is_none")]
    pub final_server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_subnet: Option<String>,
    pub independent_cache: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DomainResolver {
    pub server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TlsEnabled {
    pub enabled: bool,
}

/// 远程 DNS 服务器参数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemoteDns {
    pub server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsEnabled>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detour: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_resolver: Option<DomainResolver>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocalDns {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FakeIpDns {
    pub inet4_range: String,
    pub inet6_range: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostsDns {
    pub predefined: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DnsServerKind {
    Local(LocalDns),
    Udp(RemoteDns),
    Tcp(RemoteDns),
    Tls(RemoteDns),
    Quic(RemoteDns),
    Https(RemoteDns),
    H3(RemoteDns),
    #[serde(rename = "fakeip")]
    FakeIp(FakeIpDns),
    Hosts(HostsDns),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsServer {
    pub tag: String,
    #[serde(flatten)]
    pub kind: DnsServerKind,
}

impl DnsServer {
    pub fn remote(&self) -> Option<&RemoteDns> {
        match &self.kind {
            DnsServerKind::Udp(r)
            | DnsServerKind::Tcp(r)
            | DnsServerKind::Tls(r)
            | DnsServerKind::Quic(r)
            | DnsServerKind::Https(r)
            | DnsServerKind::H3(r) => Some(r),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            DnsServerKind::Local(_) => "local",
            DnsServerKind::Udp(_) => "udp",
            DnsServerKind::Tcp(_) => "tcp",
            DnsServerKind::Tls(_) => "tls",
            DnsServerKind::Quic(_) => "quic",
            DnsServerKind::Https(_) => "https",
            DnsServerKind::H3(_) => "h3",
            DnsServerKind::FakeIp(_) => "fakeip",
            DnsServerKind::Hosts(_) => "hosts",
        }
    }
}

/// DNS 规则，普通规则或逻辑组合
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DnsRule {
    Default(Box<DnsRuleDefault>),
    Logical(DnsRuleLogical),
}

impl From<DnsRuleDefault> for DnsRule {
    fn from(rule: DnsRuleDefault) -> Self {
        Self::Default(Box::new(rule))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DnsRuleDefault {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inbound: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_type: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_suffix: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_keyword: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_regex: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_set: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_is_private: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_accept_any: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clash_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wifi_ssid: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wifi_bssid: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_cache: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewrite_ttl: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_subnet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DnsRuleLogical {
    #[serde(rename = "type")]
    pub kind: String,
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<DnsRule>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

// ---------------------------------------------------------------------------
// Route

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouteOptions {
    pub rules: Vec<RouteRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_set: Option<Vec<RuleSet>>,
    #[serde(rename = "final", skip_serializing_if = "Option::is_none")]
    pub final_outbound: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_detect_interface: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RouteRule {
    Default(Box<RouteRuleDefault>),
    Logical(RouteRuleLogical),
}

impl From<RouteRuleDefault> for RouteRule {
    fn from(rule: RouteRuleDefault) -> Self {
        Self::Default(Box::new(rule))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouteRuleDefault {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inbound: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_suffix: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_keyword: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_regex: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_set: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_cidr: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_is_private: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ip_cidr: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ip_is_private: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_port: Option<Vec<u16>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_port_range: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<Vec<u16>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_range: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clash_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wifi_ssid: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wifi_bssid: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_type: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_is_expensive: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbound: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_fragment: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_record_fragment: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sniffer: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_cache: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewrite_ttl: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_subnet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouteRuleLogical {
    #[serde(rename = "type")]
    pub kind: String,
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<RouteRule>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbound: Option<String>,
}

/// 规则集描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleSet {
    pub tag: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

// ---------------------------------------------------------------------------
// Inbound

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InboundUser {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TunInbound {
    pub address: Vec<String>,
    pub mtu: u32,
    pub stack: String,
    pub auto_route: bool,
    pub endpoint_independent_nat: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MixedInbound {
    pub listen: String,
    pub listen_port: u16,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<InboundUser>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectInbound {
    pub listen: String,
    pub listen_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundKind {
    Tun(TunInbound),
    Mixed(MixedInbound),
    Direct(DirectInbound),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Inbound {
    pub tag: String,
    #[serde(flatten)]
    pub kind: InboundKind,
}

// ---------------------------------------------------------------------------
// Outbound

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutboundTls {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alpn: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utls: Option<UtlsOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reality: Option<RealityOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UtlsOptions {
    pub enabled: bool,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RealityOptions {
    pub enabled: bool,
    pub public_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub short_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportOptions {
    Ws {
        #[serde(skip_serializing_if = "String::is_empty")]
        path: String,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    Http {
        #[serde(skip_serializing_if = "Vec::is_empty")]
        host: Vec<String>,
        #[serde(skip_serializing_if = "String::is_empty")]
        path: String,
    },
    Grpc {
        service_name: String,
    },
    #[serde(rename = "httpupgrade")]
    HttpUpgrade {
        #[serde(skip_serializing_if = "String::is_empty")]
        host: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        path: String,
    },
    Quic {},
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SocksOutbound {
    pub server: String,
    pub server_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HttpOutbound {
    pub server: String,
    pub server_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<OutboundTls>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShadowsocksOutbound {
    pub server: String,
    pub server_port: u16,
    pub method: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_opts: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VMessOutbound {
    pub server: String,
    pub server_port: u16,
    pub uuid: String,
    pub security: String,
    pub alter_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<OutboundTls>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VLessOutbound {
    pub server: String,
    pub server_port: u16,
    pub uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<OutboundTls>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrojanOutbound {
    pub server: String,
    pub server_port: u16,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<OutboundTls>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HysteriaOutbound {
    pub server: String,
    pub server_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_str: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obfs: Option<String>,
    pub up_mbps: u32,
    pub down_mbps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_ports: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hop_interval: Option<String>,
    pub tls: OutboundTls,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Hysteria2Obfs {
    #[serde(rename = "type")]
    pub kind: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Hysteria2Outbound {
    pub server: String,
    pub server_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obfs: Option<Hysteria2Obfs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up_mbps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down_mbps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_ports: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hop_interval: Option<String>,
    pub tls: OutboundTls,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TuicOutbound {
    pub server: String,
    pub server_port: u16,
    pub uuid: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub congestion_control: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub udp_relay_mode: Option<String>,
    pub zero_rtt_handshake: bool,
    pub tls: OutboundTls,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SshOutbound {
    pub server: String,
    pub server_port: u16,
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_passphrase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_key: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShadowTlsOutbound {
    pub server: String,
    pub server_port: u16,
    pub version: u8,
    pub password: String,
    pub tls: OutboundTls,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnyTlsOutbound {
    pub server: String,
    pub server_port: u16,
    pub password: String,
    pub tls: OutboundTls,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WireGuardPeer {
    pub address: String,
    pub port: u16,
    pub public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_shared_key: Option<String>,
    pub allowed_ips: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserved: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WireGuardEndpoint {
    pub address: Vec<String>,
    pub private_key: String,
    pub mtu: u32,
    pub peers: Vec<WireGuardPeer>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelectorOutbound {
    pub outbounds: Vec<String>,
    #[serde(rename = "default", skip_serializing_if = "Option::is_none")]
    pub default_outbound: Option<String>,
    pub interrupt_exist_connections: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UrlTestOutbound {
    pub outbounds: Vec<String>,
    pub url: String,
    pub interval: String,
    pub tolerance: u32,
    pub idle_timeout: String,
    pub interrupt_exist_connections: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Empty {}

/// 各协议的 outbound 形态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundKind {
    Direct(Empty),
    Block(Empty),
    Socks(SocksOutbound),
    Http(HttpOutbound),
    Shadowsocks(ShadowsocksOutbound),
    Vmess(VMessOutbound),
    Vless(VLessOutbound),
    Trojan(TrojanOutbound),
    Hysteria(HysteriaOutbound),
    Hysteria2(Hysteria2Outbound),
    Tuic(TuicOutbound),
    Ssh(SshOutbound),
    #[serde(rename = "shadowtls")]
    ShadowTls(ShadowTlsOutbound),
    #[serde(rename = "anytls")]
    AnyTls(AnyTlsOutbound),
    #[serde(rename = "wireguard")]
    WireGuard(WireGuardEndpoint),
    Selector(SelectorOutbound),
    #[serde(rename = "urltest")]
    UrlTest(UrlTestOutbound),
}

/// outbound 主体：类型化的协议参数，或用户直接提供的 JSON
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundBody {
    Typed(OutboundKind),
    Raw(Map<String, Value>),
}

impl From<OutboundKind> for OutboundBody {
    fn from(kind: OutboundKind) -> Self {
        Self::Typed(kind)
    }
}

/// 一个引擎 outbound / endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub tag: String,
    pub body: OutboundBody,
    pub detour: Option<String>,
    pub domain_resolver: Option<DomainResolver>,
    pub udp_over_tcp: bool,
    /// 用户自定义 JSON，在 tag 与 detour 之前合并
    pub overrides: Option<Value>,
}

impl Outbound {
    pub fn new(tag: impl Into<String>, body: impl Into<OutboundBody>) -> Self {
        Self {
            tag: tag.into(),
            body: body.into(),
            detour: None,
            domain_resolver: None,
            udp_over_tcp: false,
            overrides: None,
        }
    }

    pub fn direct(tag: impl Into<String>) -> Self {
        Self::new(tag, OutboundKind::Direct(Empty {}))
    }

    pub fn block(tag: impl Into<String>) -> Self {
        Self::new(tag, OutboundKind::Block(Empty {}))
    }

    /// 引擎中的类型名
    pub fn type_name(&self) -> String {
        match &self.body {
            OutboundBody::Typed(kind) => serde_json::to_value(kind)
                .ok()
                .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_string))
                .unwrap_or_default(),
            OutboundBody::Raw(map) => map
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string(),
        }
    }

    /// 服务器地址（原始 JSON 取 `server` 字段）
    pub fn server(&self) -> Option<String> {
        let value = self.body_value().ok()?;
        value.get("server").and_then(|s| s.as_str()).map(str::to_string)
    }

    fn body_value(&self) -> Result<Value, serde_json::Error> {
        match &self.body {
            OutboundBody::Typed(kind) => serde_json::to_value(kind),
            OutboundBody::Raw(map) => Ok(Value::Object(map.clone())),
        }
    }

    /// 按固定顺序生成最终 JSON：主体、通用字段、自定义合并、tag、detour
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        let mut value = self.body_value()?;
        if let Value::Object(map) = &mut value {
            if self.udp_over_tcp {
                map.insert("udp_over_tcp".to_string(), Value::Bool(true));
            }
            if let Some(resolver) = &self.domain_resolver {
                map.insert("domain_resolver".to_string(), serde_json::to_value(resolver)?);
            }
        }
        if let Some(overrides) = &self.overrides {
            merge_json(overrides, &mut value, false);
        }
        if let Value::Object(map) = &mut value {
            map.insert("tag".to_string(), Value::String(self.tag.clone()));
            if let Some(detour) = &self.detour {
                map.insert("detour".to_string(), Value::String(detour.clone()));
            }
        }
        Ok(value)
    }
}

impl Serialize for Outbound {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value()
            .map_err(S::Error::custom)?
            .serialize(serializer)
    }
}
