use thiserror::Error;

/// 配置构建错误
///
/// 任何一个错误都会让本次构建整体失败，不会输出部分配置。
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("No remote DNS, check your settings!")]
    NoRemoteDns,

    #[error("No direct DNS, check your settings!")]
    NoDirectDns,

    #[error("Your DNS mode requires set direct DNS client subnet.")]
    NoClientSubnet,

    #[error("Cyclic reference detected at profile {0}")]
    CyclicReference(i64),

    #[error("Nested proxy set is not supported (profile {0})")]
    NestedProxySet(i64),

    #[error("Chain and proxy set can not be combined (profile {0})")]
    ChainInProxySet(i64),

    #[error("Front or landing proxy can not be used with proxy set (profile {0})")]
    ProxySetWithFrontOrLanding(i64),

    #[error("Profile not found: {0}")]
    ProfileNotFound(i64),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid custom JSON of profile {id}: {source}")]
    InvalidCustomJson {
        id: i64,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to allocate local port: {0}")]
    PortAllocation(#[from] std::io::Error),
}

/// 订阅更新错误
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Failed to fetch subscription: {0}")]
    Fetch(String),

    #[error("Failed to fetch: HTTP {0}")]
    Http(u16),

    #[error("Failed to parse subscription: {0}")]
    Parse(String),

    #[error("No proxies found in subscription")]
    Empty,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Group {0} is not a subscription")]
    NotSubscription(i64),

    #[error("Update cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for UpdateError {
    fn from(e: reqwest::Error) -> Self {
        Self::Fetch(e.to_string())
    }
}
