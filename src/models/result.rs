use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use super::profile::Profile;
use crate::utils::PortAllocator;

/// 由外部插件进程承载的一跳
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalHop {
    /// 插件在本地监听的 SOCKS 端口
    pub local_port: u16,
    pub profile: Profile,
    /// 插件实际连接的地址；经过映射时为本地映射入站
    pub final_address: String,
    pub final_port: u16,
}

/// 一条链中需要外部插件进程的节点
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExternalChain {
    pub entries: Vec<ExternalHop>,
}

impl ExternalChain {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 配置构建结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    /// 交给引擎的完整配置
    pub config: Value,
    /// 每条链的外部插件端口表
    pub external_index: Vec<ExternalChain>,
    pub main_id: i64,
    /// outbound tag → 流量计入的节点 id
    pub traffic_map: BTreeMap<String, Vec<i64>>,
    /// 节点 id → outbound tag
    pub profile_tag_map: BTreeMap<i64, String>,
    /// 以选择器方式构建时的分组 id
    pub selector_group_id: Option<i64>,
    /// 需要提示用户的警告
    pub warnings: Vec<String>,
    /// 外部插件与映射入站占用的本地端口，配置停用后应归还
    #[serde(skip)]
    pub local_ports: Vec<u16>,
}

impl BuildResult {
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.config)
    }

    /// 配置内容摘要，内容不变时保持不变
    pub fn digest(&self) -> String {
        use sha2::{Digest, Sha256};
        let bytes = serde_json::to_vec(&self.config).unwrap_or_default();
        format!("{:x}", Sha256::digest(&bytes))
    }

    /// 归还本次构建占用的端口
    pub fn release_ports(&mut self, ports: &dyn PortAllocator) {
        for port in self.local_ports.drain(..) {
            ports.release(port);
        }
    }

    pub fn needs_external(&self) -> bool {
        self.external_index.iter().any(|chain| !chain.is_empty())
    }
}
