//! 规则项语法：`type[+dns|-dns]:content`
//!
//! 解析永远不会失败：无法识别的类型整体降级为无类型关键字，
//! 旧版本或手写的规则文本因此始终可以加载。

use std::fmt;

/// 私有地址
pub const CONTENT_PRIVATE: &str = "private";
/// 任意地址，仅用于 DNS
pub const CONTENT_ANY: &str = "any";

/// 规则项类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RuleItemType {
    /// 无类型：域名关键字或 IP CIDR
    #[default]
    Keyword,
    /// `set:` 规则集
    RuleSet,
    /// `full:` 完整域名
    Full,
    /// `domain:` 域名后缀
    DomainSuffix,
    /// `regexp:` 正则
    Regex,
}

impl RuleItemType {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "" => Some(Self::Keyword),
            "set" => Some(Self::RuleSet),
            "full" => Some(Self::Full),
            "domain" => Some(Self::DomainSuffix),
            "regexp" => Some(Self::Regex),
            _ => None,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            Self::Keyword => "",
            Self::RuleSet => "set",
            Self::Full => "full",
            Self::DomainSuffix => "domain",
            Self::Regex => "regexp",
        }
    }
}

/// 解析后的规则项
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RuleItem {
    pub item_type: RuleItemType,
    pub content: String,
    /// 是否只作用于 DNS 阶段
    pub dns: bool,
}

impl RuleItem {
    pub fn new(item_type: RuleItemType, content: impl Into<String>, dns: bool) -> Self {
        Self {
            item_type,
            content: content.into(),
            dns,
        }
    }

    fn untyped(content: &str) -> Self {
        Self::new(RuleItemType::Keyword, content, false)
    }

    /// 解析单条规则项
    pub fn parse(raw: &str, default_dns: bool) -> Self {
        let Some((left, content)) = raw.split_once(':') else {
            return Self::untyped(raw);
        };

        let (token, dns) = if let Some(token) = left.strip_suffix("+dns") {
            (token, Some(true))
        } else if let Some(token) = left.strip_suffix("-dns") {
            (token, Some(false))
        } else {
            (left, None)
        };

        match RuleItemType::from_token(token) {
            Some(item_type) => Self::new(item_type, content, dns.unwrap_or(default_dns)),
            None => Self::untyped(raw),
        }
    }

    /// 按顺序解析多条规则项
    pub fn parse_all<S: AsRef<str>>(list: &[S], default_dns: bool) -> Vec<Self> {
        list.iter()
            .map(|raw| Self::parse(raw.as_ref(), default_dns))
            .collect()
    }

    pub fn is_private(&self) -> bool {
        self.content == CONTENT_PRIVATE
    }

    pub fn is_any(&self) -> bool {
        self.content == CONTENT_ANY
    }
}

impl fmt::Display for RuleItem {
    /// 规范形式，总是带 `+dns` / `-dns` 后缀
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = if self.dns { "+dns" } else { "-dns" };
        write!(f, "{}{}:{}", self.item_type.token(), suffix, self.content)
    }
}
