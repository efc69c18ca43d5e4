//! 订阅分组更新
//!
//! 获取、解析、去重后与分组内已有节点按显示名比对，只提交必要的增删改。
//! 已有节点的 id 和流量统计在更新时保留，当前选中的节点不会被改动。

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use super::feeds::{ooc_api_url, parse_ooc, parse_sip008};
use super::fetch::{parse_userinfo, SubscriptionFetcher};
use super::parser::parse_raw;
use crate::error::UpdateError;
use crate::models::{
    BuildSettings, Ipv6Mode, Profile, ProxyBean, ProxyGroup, SubscriptionBean, SubscriptionType,
};
use crate::store::ProfileStore;
use crate::utils::is_ip_address;

/// 强制解析时的并发数
const RESOLVE_CONCURRENCY: usize = 5;

/// 一次成功更新的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReport {
    pub group_id: i64,
    pub group_name: String,
    /// 新增、修改、删除的总数
    pub changed: usize,
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    /// 去重时丢弃的节点，名称后附保留节点的序号
    pub duplicate: Vec<String>,
    /// 解析时跳过的条目
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Success(UpdateReport),
    Failure { group_id: i64, message: String },
    /// 同一分组已有更新在进行
    AlreadyRunning(i64),
}

/// 更新过程的观察者，所有回调都有默认空实现
pub trait GroupObserver: Send + Sync {
    fn on_update_started(&self, _group_id: i64) {}

    fn on_resolve_progress(&self, _group_id: i64, _done: usize, _total: usize) {}

    fn on_update_success(&self, _report: &UpdateReport) {}

    fn on_update_failure(&self, _group_id: i64, _message: &str) {}
}

/// 强制解析使用的域名解析
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn lookup(&self, host: &str) -> std::io::Result<Vec<IpAddr>>;
}

/// 系统解析
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn lookup(&self, host: &str) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// 正在更新的分组，离开作用域时移除
struct UpdatingGuard {
    updating: Arc<Mutex<HashSet<i64>>>,
    group_id: i64,
}

impl UpdatingGuard {
    fn acquire(updating: &Arc<Mutex<HashSet<i64>>>, group_id: i64) -> Option<Self> {
        if !updating.lock().insert(group_id) {
            return None;
        }
        Some(Self {
            updating: Arc::clone(updating),
            group_id,
        })
    }
}

impl Drop for UpdatingGuard {
    fn drop(&mut self) {
        self.updating.lock().remove(&self.group_id);
    }
}

/// 订阅更新器
///
/// 克隆后共享同一个进行中集合，应用内应只持有一个实例。
#[derive(Clone)]
pub struct GroupUpdater {
    store: Arc<dyn ProfileStore>,
    fetcher: Arc<dyn SubscriptionFetcher>,
    resolver: Arc<dyn HostResolver>,
    observers: Vec<Arc<dyn GroupObserver>>,
    ipv6_mode: Ipv6Mode,
    default_user_agent: String,
    updating: Arc<Mutex<HashSet<i64>>>,
}

impl GroupUpdater {
    pub fn new(
        store: Arc<dyn ProfileStore>,
        fetcher: Arc<dyn SubscriptionFetcher>,
        settings: &BuildSettings,
    ) -> Self {
        Self {
            store,
            fetcher,
            resolver: Arc::new(SystemResolver),
            observers: Vec::new(),
            ipv6_mode: settings.ipv6_mode,
            default_user_agent: settings.default_user_agent.clone(),
            updating: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn GroupObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn is_updating(&self, group_id: i64) -> bool {
        self.updating.lock().contains(&group_id)
    }

    fn notify(&self, f: impl Fn(&dyn GroupObserver)) {
        for observer in &self.observers {
            f(observer.as_ref());
        }
    }

    /// 到期需要自动更新的订阅分组
    pub fn due_groups(&self, now: i64, connected: bool) -> Vec<i64> {
        self.store
            .all_groups()
            .into_iter()
            .filter(|group| {
                let Some(sub) = group.subscription.as_ref().filter(|_| group.is_subscription())
                else {
                    return false;
                };
                if !sub.auto_update || (sub.update_when_connected_only && !connected) {
                    return false;
                }
                now - sub.last_updated >= i64::from(sub.auto_update_delay) * 60
            })
            .map(|group| group.id)
            .collect()
    }

    /// 在后台任务中更新，取消任务时进行中标记同样会被清除
    pub fn spawn_update(&self, group_id: i64) -> tokio::task::JoinHandle<UpdateOutcome> {
        let updater = self.clone();
        tokio::spawn(async move { updater.update(group_id).await })
    }

    /// 并发更新多个分组
    pub async fn update_all(&self, group_ids: &[i64]) -> Vec<UpdateOutcome> {
        futures_util::future::join_all(group_ids.iter().map(|id| self.update(*id))).await
    }

    /// 更新一个订阅分组，错误不会向外抛出，只体现在结果和观察者回调中
    pub async fn update(&self, group_id: i64) -> UpdateOutcome {
        let Some(guard) = UpdatingGuard::acquire(&self.updating, group_id) else {
            log::info!("Group {} is already updating, skipped", group_id);
            return UpdateOutcome::AlreadyRunning(group_id);
        };

        log::info!("Updating subscription group {}", group_id);
        self.notify(|o| o.on_update_started(group_id));
        let result = self.do_update(group_id).await;
        drop(guard);

        match result {
            Ok(report) => {
                log::info!(
                    "Group {} updated: {} added, {} updated, {} deleted, {} duplicate",
                    group_id,
                    report.added.len(),
                    report.updated.len(),
                    report.deleted.len(),
                    report.duplicate.len()
                );
                self.notify(|o| o.on_update_success(&report));
                UpdateOutcome::Success(report)
            }
            Err(e) => {
                let message = e.to_string();
                log::warn!("Failed to update group {}: {}", group_id, message);
                self.notify(|o| o.on_update_failure(group_id, &message));
                UpdateOutcome::Failure { group_id, message }
            }
        }
    }

    fn user_agent(&self, sub: &SubscriptionBean) -> String {
        if sub.custom_user_agent.trim().is_empty() {
            self.default_user_agent.clone()
        } else {
            sub.custom_user_agent.trim().to_string()
        }
    }

    async fn do_update(&self, group_id: i64) -> Result<UpdateReport, UpdateError> {
        let group = self
            .store
            .get_group(group_id)
            .ok_or_else(|| UpdateError::Store(format!("Group not found: {}", group_id)))?;
        let mut sub = match &group.subscription {
            Some(sub) if group.is_subscription() => sub.clone(),
            _ => return Err(UpdateError::NotSubscription(group_id)),
        };
        let user_agent = self.user_agent(&sub);

        let mut warnings = Vec::new();
        let mut beans = match sub.sub_type {
            SubscriptionType::Raw => {
                let response = self.fetcher.fetch(&sub.link, &user_agent).await?;
                if let Some(usage) = response.userinfo.as_deref().and_then(parse_userinfo) {
                    sub.bytes_used = usage.bytes_used;
                    sub.bytes_remaining = usage.bytes_remaining;
                    sub.expiry_date = if usage.expiry_date > 0 {
                        usage.expiry_date
                    } else {
                        -1
                    };
                }
                let parsed = parse_raw(&response.body)?;
                warnings = parsed.warnings;
                parsed.beans
            }
            SubscriptionType::Sip008 => {
                if sub.link.starts_with("http://") {
                    log::warn!("Use SIP008 with HTTP: {}", sub.link);
                }
                let response = self.fetcher.fetch(&sub.link, &user_agent).await?;
                let feed = parse_sip008(&response.body)?;
                sub.bytes_used = feed.bytes_used;
                sub.bytes_remaining = feed.bytes_remaining;
                feed.beans
            }
            SubscriptionType::Oocv1 => {
                let api_url = ooc_api_url(&sub.token)?;
                let link = if sub.link.trim().is_empty() {
                    api_url
                } else {
                    sub.link.clone()
                };
                let response = self.fetcher.fetch(&link, &user_agent).await?;
                let feed = parse_ooc(&response.body)?;
                sub.username = feed.username;
                sub.bytes_used = feed.bytes_used;
                sub.bytes_remaining = feed.bytes_remaining;
                sub.expiry_date = feed.expiry_date;
                warnings.extend(
                    feed.unsupported_protocols
                        .iter()
                        .map(|p| format!("Protocol not supported: {}", p)),
                );
                feed.beans
            }
        };

        if beans.is_empty() {
            return Err(UpdateError::Empty);
        }
        log::debug!("Fetched {} proxies for group {}", beans.len(), group_id);

        if sub.force_resolve {
            self.force_resolve(group_id, &mut beans).await;
        }

        let duplicate = if sub.deduplication {
            let (unique, duplicate) = deduplicate(beans);
            beans = unique;
            duplicate
        } else {
            Vec::new()
        };

        let named = disambiguate_names(beans);

        // 更新期间分组被删除时放弃提交
        let Some(mut group) = self.store.get_group(group_id) else {
            return Err(UpdateError::Cancelled);
        };

        let mut report = self.commit(&group, named)?;
        report.duplicate = duplicate;
        report.warnings = warnings;

        sub.last_updated = chrono::Utc::now().timestamp();
        group.subscription = Some(sub);
        self.store
            .update_group(&group)
            .map_err(|e| UpdateError::Store(e.to_string()))?;

        Ok(report)
    }

    async fn force_resolve(&self, group_id: i64, beans: &mut [ProxyBean]) {
        let ipv6_first = matches!(self.ipv6_mode, Ipv6Mode::Prefer | Ipv6Mode::Only);
        let targets: Vec<(usize, String)> = beans
            .iter()
            .enumerate()
            .filter(|(_, bean)| needs_resolve(bean))
            .map(|(index, bean)| (index, bean.common().server_address.clone()))
            .collect();
        let total = targets.len();
        if total == 0 {
            return;
        }

        let resolver = &self.resolver;
        let mut lookups = stream::iter(targets)
            .map(|(index, host)| async move {
                let result = resolver.lookup(&host).await;
                (index, host, result)
            })
            .buffer_unordered(RESOLVE_CONCURRENCY);

        let mut done = 0;
        while let Some((index, host, result)) = lookups.next().await {
            done += 1;
            match result {
                Ok(addrs) => match pick_address(&addrs, ipv6_first) {
                    Some(ip) => apply_resolved(&mut beans[index], &host, ip),
                    None => log::debug!("No address for {}", host),
                },
                Err(e) => log::debug!("Failed to resolve {}: {}", host, e),
            }
            self.notify(|o| o.on_resolve_progress(group_id, done, total));
        }
    }

    /// 按显示名与已有节点比对并写入存储
    fn commit(
        &self,
        group: &ProxyGroup,
        named: Vec<(String, ProxyBean)>,
    ) -> Result<UpdateReport, UpdateError> {
        let store_err = |e: anyhow::Error| UpdateError::Store(e.to_string());
        let incoming: HashSet<&str> = named.iter().map(|(name, _)| name.as_str()).collect();

        let mut matched: HashMap<String, Profile> = HashMap::new();
        let mut to_delete = Vec::new();
        for profile in self.store.profiles_by_group(group.id) {
            let name = profile.bean.display_name();
            if incoming.contains(name.as_str()) && !matched.contains_key(&name) {
                matched.insert(name, profile);
            } else {
                to_delete.push(profile);
            }
        }

        let mut report = UpdateReport {
            group_id: group.id,
            group_name: group.display_name(),
            deleted: to_delete.iter().map(|p| p.bean.display_name()).collect(),
            ..Default::default()
        };

        let mut to_update = Vec::new();
        let mut to_insert = Vec::new();
        for (position, (name, mut bean)) in named.into_iter().enumerate() {
            let order = position as i64 + 1;
            match matched.remove(&name) {
                Some(mut profile) => {
                    keep_local_settings(&profile.bean, &mut bean);
                    if profile.bean != bean {
                        log::debug!("Updated profile: {}", name);
                        profile.bean = bean;
                        profile.user_order = order;
                        to_update.push(profile);
                        report.updated.push(name);
                    } else if profile.user_order != order {
                        log::debug!("Reordered profile: {}", name);
                        profile.user_order = order;
                        to_update.push(profile);
                    }
                }
                None => {
                    log::debug!("Inserted profile: {}", name);
                    let mut profile = Profile::new(group.id, bean);
                    profile.user_order = order;
                    to_insert.push(profile);
                    report.added.push(name);
                }
            }
        }

        if !to_update.is_empty() {
            self.store.update_profiles(&to_update).map_err(store_err)?;
        }
        if !to_delete.is_empty() {
            let ids: Vec<i64> = to_delete.iter().map(|p| p.id).collect();
            self.store.delete_profiles(&ids).map_err(store_err)?;
        }
        if !to_insert.is_empty() {
            self.store.insert_profiles(to_insert).map_err(store_err)?;
        }

        report.changed = report.added.len() + report.updated.len() + report.deleted.len();
        Ok(report)
    }
}

/// 组合节点、naive 和已是 IP 的地址不解析
fn needs_resolve(bean: &ProxyBean) -> bool {
    if !bean.can_mapping() || matches!(bean, ProxyBean::Naive(_) | ProxyBean::Direct(_)) {
        return false;
    }
    let address = &bean.common().server_address;
    !address.trim().is_empty() && !is_ip_address(address)
}

fn pick_address(addrs: &[IpAddr], ipv6_first: bool) -> Option<IpAddr> {
    addrs
        .iter()
        .find(|addr| addr.is_ipv4() != ipv6_first)
        .or_else(|| addrs.first())
        .copied()
}

/// 地址替换为 IP，SNI 为空时保留原域名以通过证书校验
fn apply_resolved(bean: &mut ProxyBean, host: &str, ip: IpAddr) {
    if let Some(sni) = bean.sni_mut() {
        if sni.trim().is_empty() {
            *sni = host.to_string();
        }
    }
    bean.common_mut().server_address = ip.to_string();
}

/// 按（协议、地址、端口）去重，保留第一个
fn deduplicate(beans: Vec<ProxyBean>) -> (Vec<ProxyBean>, Vec<String>) {
    let mut unique: Vec<ProxyBean> = Vec::with_capacity(beans.len());
    let mut seen: HashMap<(&'static str, String, u16), usize> = HashMap::new();
    let mut duplicate = Vec::new();

    for bean in beans {
        if !bean.can_mapping() {
            unique.push(bean);
            continue;
        }
        let common = bean.common();
        let key = (
            bean.type_name(),
            common.server_address.to_lowercase(),
            common.server_port,
        );
        match seen.get(&key) {
            Some(&index) => {
                log::debug!("Duplicate profile: {}", bean.display_name());
                duplicate.push(format!("{} ({})", bean.display_name(), index));
            }
            None => {
                seen.insert(key, unique.len());
                unique.push(bean);
            }
        }
    }

    (unique, duplicate)
}

/// 显示名重复时追加 ` (n)`
fn disambiguate_names(beans: Vec<ProxyBean>) -> Vec<(String, ProxyBean)> {
    let mut names = HashSet::new();
    let mut result = Vec::with_capacity(beans.len());
    for mut bean in beans {
        let base = bean.display_name();
        let mut name = base.clone();
        let mut index = 0;
        while names.contains(&name) {
            index += 1;
            name = format!("{} ({})", base, index);
        }
        if index > 0 {
            bean.common_mut().name = name.clone();
        }
        names.insert(name.clone());
        result.push((name, bean));
    }
    result
}

/// 用户在本地修改的自定义 JSON 不被订阅覆盖
fn keep_local_settings(existing: &ProxyBean, incoming: &mut ProxyBean) {
    let local = existing.common();
    let common = incoming.common_mut();
    if common.custom_outbound_json.is_empty() {
        common.custom_outbound_json = local.custom_outbound_json.clone();
    }
    if common.custom_config_json.is_empty() {
        common.custom_config_json = local.custom_config_json.clone();
    }
}
