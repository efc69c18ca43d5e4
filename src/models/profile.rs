use serde::{Deserialize, Serialize};

use super::bean::ProxyBean;

/// 节点连通状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileStatus {
    /// 未测试
    #[default]
    Untested,
    /// 可用
    Available,
    /// 不可用
    Unreachable,
    /// 测试出错
    Error,
}

/// 节点（Profile）
///
/// 一个可寻址的代理端点或复合结构（链 / 集合 / 原始配置），
/// 协议参数只保存在 `bean` 中，保证同一时刻只有一种形态。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: i64,
    pub group_id: i64,
    #[serde(default)]
    pub user_order: i64,
    /// 累计上传字节数
    #[serde(default)]
    pub tx: u64,
    /// 累计下载字节数
    #[serde(default)]
    pub rx: u64,
    #[serde(default)]
    pub status: ProfileStatus,
    #[serde(default)]
    pub ping: u32,
    #[serde(default)]
    pub uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub bean: ProxyBean,
}

impl Profile {
    /// 创建尚未入库的节点，id 由存储层分配
    pub fn new(group_id: i64, bean: ProxyBean) -> Self {
        Self {
            id: 0,
            group_id,
            user_order: 0,
            tx: 0,
            rx: 0,
            status: ProfileStatus::default(),
            ping: 0,
            uuid: uuid::Uuid::new_v4().to_string(),
            error: None,
            bean,
        }
    }

    pub fn display_name(&self) -> String {
        self.bean.display_name()
    }

    pub fn display_type(&self) -> &'static str {
        self.bean.type_name()
    }

    pub fn needs_external(&self) -> bool {
        self.bean.needs_external()
    }

    /// 替换协议参数，旧的参数随之丢弃
    pub fn put_bean(&mut self, bean: ProxyBean) {
        self.bean = bean;
    }

    pub fn is_chain(&self) -> bool {
        matches!(self.bean, ProxyBean::Chain(_))
    }

    pub fn is_proxy_set(&self) -> bool {
        matches!(self.bean, ProxyBean::ProxySet(_))
    }
}
