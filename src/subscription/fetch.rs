//! 订阅内容获取

use async_trait::async_trait;
use std::time::Duration;

use crate::error::UpdateError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const USERINFO_HEADER: &str = "Subscription-Userinfo";

/// 获取到的订阅内容
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResponse {
    pub body: String,
    /// `Subscription-Userinfo` 响应头
    pub userinfo: Option<String>,
}

/// 流量与到期信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageInfo {
    pub bytes_used: i64,
    pub bytes_remaining: i64,
    pub expiry_date: i64,
}

/// 解析 `upload=…; download=…; total=…; expire=…`，个别字段可能为空
pub fn parse_userinfo(header: &str) -> Option<UsageInfo> {
    if header.trim().is_empty() {
        return None;
    }
    let mut used = 0i64;
    let mut total = 0i64;
    let mut expire = 0i64;
    for part in header.split(';') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        let value = value.trim().parse::<i64>().unwrap_or(0);
        match key.trim() {
            "upload" | "download" => used += value,
            "total" => total = value,
            "expire" => expire = value,
            _ => {}
        }
    }
    Some(UsageInfo {
        bytes_used: used,
        bytes_remaining: total - used,
        expiry_date: expire,
    })
}

/// 订阅获取方式
#[async_trait]
pub trait SubscriptionFetcher: Send + Sync {
    async fn fetch(&self, link: &str, user_agent: &str) -> Result<FetchResponse, UpdateError>;
}

/// 本地文件链接：`file://` 与 `content://` 直接读取
fn local_path(link: &str) -> Option<&str> {
    link.strip_prefix("file://")
        .or_else(|| link.strip_prefix("content://"))
}

/// HTTP 获取，可经由本地代理
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, UpdateError> {
        let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self { client })
    }

    /// 通过本地 mixed 入站获取，适用于引擎已运行的情况
    pub fn with_proxy(proxy: &str) -> Result<Self, UpdateError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .proxy(reqwest::Proxy::all(proxy)?)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SubscriptionFetcher for HttpFetcher {
    async fn fetch(&self, link: &str, user_agent: &str) -> Result<FetchResponse, UpdateError> {
        if let Some(path) = local_path(link) {
            let path = urlencoding::decode(path)
                .map(|p| p.into_owned())
                .unwrap_or_else(|_| path.to_string());
            log::debug!("Reading subscription from local file: {}", path);
            let body = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| UpdateError::Fetch(format!("{}: {}", path, e)))?;
            return Ok(FetchResponse {
                body,
                userinfo: None,
            });
        }

        if link.starts_with("http://") {
            log::warn!("Fetching subscription over plain HTTP: {}", link);
        }

        let response = self
            .client
            .get(link)
            .header("User-Agent", user_agent)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(UpdateError::Http(response.status().as_u16()));
        }

        let userinfo = response
            .headers()
            .get(USERINFO_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;
        Ok(FetchResponse { body, userinfo })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_userinfo() {
        let info =
            parse_userinfo("upload=2375927198; download=12983696043; total=1099511627776; expire=1862111613")
                .unwrap();
        assert_eq!(info.bytes_used, 2375927198 + 12983696043);
        assert_eq!(info.bytes_remaining, 1099511627776 - 2375927198 - 12983696043);
        assert_eq!(info.expiry_date, 1862111613);

        // 空字段按 0 处理
        let info = parse_userinfo("upload=; download=100; total=1000; expire=").unwrap();
        assert_eq!(info.bytes_used, 100);
        assert_eq!(info.bytes_remaining, 900);
        assert_eq!(info.expiry_date, 0);

        assert!(parse_userinfo("  ").is_none());
    }

    #[tokio::test]
    async fn test_fetch_local_file() {
        let path = std::env::temp_dir().join(format!("conflux-sub-{}.txt", uuid::Uuid::new_v4()));
        std::fs::write(&path, "ss://example").unwrap();

        let fetcher = HttpFetcher::new().unwrap();
        let link = format!("file://{}", path.display());
        let response = fetcher.fetch(&link, "test").await.unwrap();
        assert_eq!(response.body, "ss://example");
        assert!(response.userinfo.is_none());

        let missing = fetcher.fetch("file:///nonexistent/conflux", "test").await;
        assert!(matches!(missing, Err(UpdateError::Fetch(_))));
    }
}
