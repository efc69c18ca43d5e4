use serde::{Deserialize, Serialize};

use crate::utils::wrap_ipv6_host;

/// 所有服务器类配置共有的字段
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerCommon {
    pub server_address: String,
    pub server_port: u16,
    pub name: String,
    /// 合并到生成的 outbound 上的 JSON 片段
    pub custom_outbound_json: String,
    /// 合并到整个配置上的 JSON 片段（仅对根节点生效）
    pub custom_config_json: String,
}

impl ServerCommon {
    pub fn new(server_address: impl Into<String>, server_port: u16) -> Self {
        Self {
            server_address: server_address.into(),
            server_port,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// v2ray 系传输与 TLS 参数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    /// tcp / ws / grpc / http / httpupgrade / quic
    pub network: String,
    pub host: String,
    pub path: String,
    /// none / tls / reality
    pub security: String,
    pub sni: String,
    pub alpn: String,
    pub allow_insecure: bool,
    pub utls_fingerprint: String,
    pub reality_public_key: String,
    pub reality_short_id: String,
}

impl StreamSettings {
    pub fn tls_enabled(&self) -> bool {
        self.security == "tls" || self.security == "reality"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SocksBean {
    #[serde(flatten)]
    pub common: ServerCommon,
    /// 4 / 4a / 5
    pub protocol: String,
    pub username: String,
    pub password: String,
    pub udp_over_tcp: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpBean {
    #[serde(flatten)]
    pub common: ServerCommon,
    pub username: String,
    pub password: String,
    pub tls: bool,
    pub sni: String,
    pub allow_insecure: bool,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShadowsocksBean {
    #[serde(flatten)]
    pub common: ServerCommon,
    pub method: String,
    pub password: String,
    /// `name;opts` 形式的插件配置
    pub plugin: String,
    pub udp_over_tcp: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VMessBean {
    #[serde(flatten)]
    pub common: ServerCommon,
    pub uuid: String,
    pub alter_id: u32,
    pub security: String,
    #[serde(flatten)]
    pub stream: StreamSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VLessBean {
    #[serde(flatten)]
    pub common: ServerCommon,
    pub uuid: String,
    pub flow: String,
    #[serde(flatten)]
    pub stream: StreamSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrojanBean {
    #[serde(flatten)]
    pub common: ServerCommon,
    pub password: String,
    #[serde(flatten)]
    pub stream: StreamSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NaiveBean {
    #[serde(flatten)]
    pub common: ServerCommon,
    /// https / quic
    pub proto: String,
    pub username: String,
    pub password: String,
    pub sni: String,
    pub extra_headers: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HysteriaBean {
    #[serde(flatten)]
    pub common: ServerCommon,
    /// 1 / 2
    pub protocol_version: u8,
    pub auth_payload: String,
    pub obfuscation: String,
    pub sni: String,
    pub alpn: String,
    pub allow_insecure: bool,
    pub upload_mbps: u32,
    pub download_mbps: u32,
    /// hysteria 1 的传输：udp / faketcp / wechat-video
    pub protocol: String,
    pub server_ports: String,
    pub hop_interval: String,
}

impl Default for HysteriaBean {
    fn default() -> Self {
        Self {
            common: ServerCommon::default(),
            protocol_version: 2,
            auth_payload: String::new(),
            obfuscation: String::new(),
            sni: String::new(),
            alpn: String::new(),
            allow_insecure: false,
            upload_mbps: 0,
            download_mbps: 0,
            protocol: "udp".to_string(),
            server_ports: String::new(),
            hop_interval: String::new(),
        }
    }
}

impl HysteriaBean {
    /// 引擎内置实现只支持 UDP 传输的 hysteria 1
    pub fn can_use_engine(&self) -> bool {
        self.protocol_version != 1 || self.protocol.is_empty() || self.protocol == "udp"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SshBean {
    #[serde(flatten)]
    pub common: ServerCommon,
    pub username: String,
    pub password: String,
    pub private_key: String,
    pub private_key_passphrase: String,
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireGuardBean {
    #[serde(flatten)]
    pub common: ServerCommon,
    /// 每行一个地址
    pub local_address: String,
    pub private_key: String,
    pub peer_public_key: String,
    pub peer_pre_shared_key: String,
    pub mtu: u32,
    pub reserved: String,
}

impl Default for WireGuardBean {
    fn default() -> Self {
        Self {
            common: ServerCommon::default(),
            local_address: String::new(),
            private_key: String::new(),
            peer_public_key: String::new(),
            peer_pre_shared_key: String::new(),
            mtu: 1420,
            reserved: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShadowTlsBean {
    #[serde(flatten)]
    pub common: ServerCommon,
    pub version: u8,
    pub password: String,
    pub sni: String,
    pub alpn: String,
    pub allow_insecure: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TuicBean {
    #[serde(flatten)]
    pub common: ServerCommon,
    pub uuid: String,
    pub token: String,
    pub congestion_control: String,
    pub udp_relay_mode: String,
    pub alpn: String,
    pub sni: String,
    pub allow_insecure: bool,
    pub zero_rtt: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MieruBean {
    #[serde(flatten)]
    pub common: ServerCommon,
    pub protocol: String,
    pub username: String,
    pub password: String,
    pub mtu: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JuicityBean {
    #[serde(flatten)]
    pub common: ServerCommon,
    pub uuid: String,
    pub password: String,
    pub sni: String,
    pub allow_insecure: bool,
    pub pin_sha256: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnyTlsBean {
    #[serde(flatten)]
    pub common: ServerCommon,
    pub password: String,
    pub sni: String,
    pub alpn: String,
    pub allow_insecure: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectBean {
    #[serde(flatten)]
    pub common: ServerCommon,
}

/// 代理链：按列表顺序串联的节点
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChainBean {
    #[serde(flatten)]
    pub common: ServerCommon,
    pub proxies: Vec<i64>,
}

/// 代理集合的管理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetManagement {
    #[default]
    Selector,
    UrlTest,
}

/// 代理集合的成员来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum SetSource {
    /// 显式列出的节点 id
    List { proxies: Vec<i64> },
    /// 某个分组的全部节点，可用正则排除
    Group {
        #[serde(rename = "groupId")]
        group_id: i64,
        #[serde(rename = "filterNotRegex", default)]
        filter_not_regex: String,
    },
}

impl Default for SetSource {
    fn default() -> Self {
        Self::List {
            proxies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxySetBean {
    #[serde(flatten)]
    pub common: ServerCommon,
    pub management: SetManagement,
    pub source: SetSource,
    pub interrupt_exist_connections: bool,
    pub test_url: String,
    pub test_interval: String,
    pub test_idle_timeout: String,
    pub test_tolerance: u32,
}

pub const CONNECTION_TEST_URL: &str = "http://cp.cloudflare.com/";

impl Default for ProxySetBean {
    fn default() -> Self {
        Self {
            common: ServerCommon::default(),
            management: SetManagement::Selector,
            source: SetSource::default(),
            interrupt_exist_connections: false,
            test_url: CONNECTION_TEST_URL.to_string(),
            test_interval: "3m".to_string(),
            test_idle_timeout: "3m".to_string(),
            test_tolerance: 50,
        }
    }
}

/// 原始配置：完整配置或单个 outbound
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigKind {
    #[default]
    Full,
    Outbound,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigBean {
    #[serde(flatten)]
    pub common: ServerCommon,
    pub kind: ConfigKind,
    pub config: String,
}

/// 节点的协议参数，每个节点只持有其中一种
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProxyBean {
    Socks(SocksBean),
    Http(HttpBean),
    Shadowsocks(ShadowsocksBean),
    Vmess(VMessBean),
    Vless(VLessBean),
    Trojan(TrojanBean),
    Naive(NaiveBean),
    Hysteria(HysteriaBean),
    Ssh(SshBean),
    #[serde(rename = "wireguard")]
    WireGuard(WireGuardBean),
    #[serde(rename = "shadowtls")]
    ShadowTls(ShadowTlsBean),
    Tuic(TuicBean),
    Mieru(MieruBean),
    Juicity(JuicityBean),
    #[serde(rename = "anytls")]
    AnyTls(AnyTlsBean),
    Direct(DirectBean),
    Chain(ChainBean),
    #[serde(rename = "proxy-set")]
    ProxySet(ProxySetBean),
    Config(ConfigBean),
}

macro_rules! each_bean {
    ($value:expr, $bean:ident => $body:expr) => {
        match $value {
            ProxyBean::Socks($bean) => $body,
            ProxyBean::Http($bean) => $body,
            ProxyBean::Shadowsocks($bean) => $body,
            ProxyBean::Vmess($bean) => $body,
            ProxyBean::Vless($bean) => $body,
            ProxyBean::Trojan($bean) => $body,
            ProxyBean::Naive($bean) => $body,
            ProxyBean::Hysteria($bean) => $body,
            ProxyBean::Ssh($bean) => $body,
            ProxyBean::WireGuard($bean) => $body,
            ProxyBean::ShadowTls($bean) => $body,
            ProxyBean::Tuic($bean) => $body,
            ProxyBean::Mieru($bean) => $body,
            ProxyBean::Juicity($bean) => $body,
            ProxyBean::AnyTls($bean) => $body,
            ProxyBean::Direct($bean) => $body,
            ProxyBean::Chain($bean) => $body,
            ProxyBean::ProxySet($bean) => $body,
            ProxyBean::Config($bean) => $body,
        }
    };
}

impl ProxyBean {
    pub fn common(&self) -> &ServerCommon {
        each_bean!(self, b => &b.common)
    }

    pub fn common_mut(&mut self) -> &mut ServerCommon {
        each_bean!(self, b => &mut b.common)
    }

    /// 类型名，与序列化时的 `type` 字段一致
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Socks(_) => "socks",
            Self::Http(_) => "http",
            Self::Shadowsocks(_) => "shadowsocks",
            Self::Vmess(_) => "vmess",
            Self::Vless(_) => "vless",
            Self::Trojan(_) => "trojan",
            Self::Naive(_) => "naive",
            Self::Hysteria(_) => "hysteria",
            Self::Ssh(_) => "ssh",
            Self::WireGuard(_) => "wireguard",
            Self::ShadowTls(_) => "shadowtls",
            Self::Tuic(_) => "tuic",
            Self::Mieru(_) => "mieru",
            Self::Juicity(_) => "juicity",
            Self::AnyTls(_) => "anytls",
            Self::Direct(_) => "direct",
            Self::Chain(_) => "chain",
            Self::ProxySet(_) => "proxy-set",
            Self::Config(_) => "config",
        }
    }

    pub fn display_address(&self) -> String {
        let common = self.common();
        format!(
            "{}:{}",
            wrap_ipv6_host(&common.server_address),
            common.server_port
        )
    }

    pub fn display_name(&self) -> String {
        let name = &self.common().name;
        if !name.trim().is_empty() {
            return name.clone();
        }
        match self {
            Self::Chain(_) | Self::ProxySet(_) | Self::Config(_) => {
                format!("{} {}", self.type_name(), self.short_hash())
            }
            _ => self.display_address(),
        }
    }

    /// 需要外部插件进程的协议
    pub fn needs_external(&self) -> bool {
        match self {
            Self::Mieru(_) | Self::Naive(_) | Self::Juicity(_) => true,
            Self::Hysteria(bean) => !bean.can_use_engine(),
            _ => false,
        }
    }

    /// 外部插件的流量是否需要经过引擎的 direct inbound 转发
    pub fn can_mapping(&self) -> bool {
        !matches!(self, Self::Chain(_) | Self::ProxySet(_) | Self::Config(_))
    }

    pub fn udp_over_tcp(&self) -> bool {
        match self {
            Self::Socks(b) => b.udp_over_tcp,
            Self::Shadowsocks(b) => b.udp_over_tcp,
            _ => false,
        }
    }

    /// 可改写 SNI 的字段（仅启用 TLS 的协议）
    pub fn sni_mut(&mut self) -> Option<&mut String> {
        match self {
            Self::Http(b) if b.tls => Some(&mut b.sni),
            Self::Vmess(b) if b.stream.tls_enabled() => Some(&mut b.stream.sni),
            Self::Vless(b) if b.stream.tls_enabled() => Some(&mut b.stream.sni),
            Self::Trojan(b) if b.stream.tls_enabled() => Some(&mut b.stream.sni),
            Self::Naive(b) => Some(&mut b.sni),
            Self::Hysteria(b) => Some(&mut b.sni),
            Self::ShadowTls(b) => Some(&mut b.sni),
            Self::Tuic(b) => Some(&mut b.sni),
            Self::Juicity(b) => Some(&mut b.sni),
            Self::AnyTls(b) => Some(&mut b.sni),
            _ => None,
        }
    }

    /// 忽略名称比较两个节点参数是否相同
    pub fn same_settings(&self, other: &Self) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.common_mut().name.clear();
        b.common_mut().name.clear();
        a == b
    }

    fn short_hash(&self) -> String {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(serde_json::to_vec(self).unwrap_or_default());
        format!("{:x}", digest)[..8].to_string()
    }
}
