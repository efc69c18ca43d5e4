use serde::{Deserialize, Serialize};

/// 订阅格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionType {
    /// 通用订阅（链接列表 / JSON / WireGuard）
    #[default]
    Raw,
    /// Open Online Config v1
    Oocv1,
    /// SIP008
    Sip008,
}

/// 订阅元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionBean {
    #[serde(rename = "type")]
    pub sub_type: SubscriptionType,
    pub link: String,
    /// OOCv1 的 token JSON
    pub token: String,
    pub force_resolve: bool,
    pub deduplication: bool,
    pub update_when_connected_only: bool,
    pub custom_user_agent: String,
    pub auto_update: bool,
    /// 自动更新间隔（分钟）
    pub auto_update_delay: u32,
    /// 上次更新时间（Unix 秒）
    pub last_updated: i64,
    /// 已用流量，-1 表示未知
    pub bytes_used: i64,
    /// 剩余流量，-1 表示未知
    pub bytes_remaining: i64,
    pub username: String,
    /// 到期时间（Unix 秒），-1 表示未知
    pub expiry_date: i64,
    /// OOCv1 允许的协议
    pub protocols: Vec<String>,
}

impl Default for SubscriptionBean {
    fn default() -> Self {
        Self {
            sub_type: SubscriptionType::Raw,
            link: String::new(),
            token: String::new(),
            force_resolve: false,
            deduplication: false,
            update_when_connected_only: false,
            custom_user_agent: String::new(),
            auto_update: false,
            auto_update_delay: 1440,
            last_updated: 0,
            bytes_used: -1,
            bytes_remaining: -1,
            username: String::new(),
            expiry_date: -1,
            protocols: Vec::new(),
        }
    }
}

/// 分组类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupType {
    #[default]
    Basic,
    Subscription,
}

/// 节点分组
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyGroup {
    pub id: i64,
    #[serde(default)]
    pub user_order: i64,
    /// 默认分组，始终存在且只有一个
    #[serde(default)]
    pub ungrouped: bool,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub group_type: GroupType,
    /// 以选择器方式构建整个分组
    #[serde(default)]
    pub is_selector: bool,
    /// 前置代理，最先连接的一跳
    #[serde(skip_serializing_if = "Option::is_none")]
    pub front_proxy: Option<i64>,
    /// 落地代理，离目标最近的一跳
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landing_proxy: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<SubscriptionBean>,
}

impl ProxyGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            user_order: 0,
            ungrouped: false,
            name: name.into(),
            group_type: GroupType::Basic,
            is_selector: false,
            front_proxy: None,
            landing_proxy: None,
            subscription: None,
        }
    }

    pub fn new_subscription(name: impl Into<String>, subscription: SubscriptionBean) -> Self {
        Self {
            group_type: GroupType::Subscription,
            subscription: Some(subscription),
            ..Self::new(name)
        }
    }

    pub fn ungrouped() -> Self {
        Self {
            ungrouped: true,
            ..Self::new("")
        }
    }

    pub fn display_name(&self) -> String {
        if self.ungrouped && self.name.is_empty() {
            "Ungrouped".to_string()
        } else if self.name.is_empty() {
            format!("Group {}", self.id)
        } else {
            self.name.clone()
        }
    }

    pub fn is_subscription(&self) -> bool {
        self.group_type == GroupType::Subscription && self.subscription.is_some()
    }
}
