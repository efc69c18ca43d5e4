//! 代理链 / 代理集合展开

use regex::Regex;

use crate::error::BuildError;
use crate::models::{Profile, ProxyBean, ProxySetBean, SetSource};
use crate::store::ProfileStore;

/// 把一个节点展开为实际经过的各跳
///
/// 结果中下标 0 是出口（离目标最近），最后一个是最先连接的一跳。
/// 代理集合展开为 `[成员..., 集合本身]`，不做反转。
pub struct ChainResolver<'a> {
    store: &'a dyn ProfileStore,
}

impl<'a> ChainResolver<'a> {
    pub fn new(store: &'a dyn ProfileStore) -> Self {
        Self { store }
    }

    /// 展开节点，并加上所在分组的前置与落地代理
    pub fn resolve(&self, profile: &Profile) -> Result<Vec<Profile>, BuildError> {
        let mut path = Vec::new();
        let mut list = self.resolve_internal(profile, &mut path, false)?;

        let Some(group) = self.store.get_group(profile.group_id) else {
            return Ok(list);
        };
        if group.front_proxy.is_none() && group.landing_proxy.is_none() {
            return Ok(list);
        }
        if profile.is_proxy_set() {
            return Err(BuildError::ProxySetWithFrontOrLanding(profile.id));
        }

        if let Some(front) = group.front_proxy {
            match self.store.get_profile(front) {
                Some(front) => list.push(front),
                None => log::warn!("Front proxy {} of group {} not found", front, group.id),
            }
        }
        if let Some(landing) = group.landing_proxy {
            match self.store.get_profile(landing) {
                Some(landing) => list.insert(0, landing),
                None => log::warn!("Landing proxy {} of group {} not found", landing, group.id),
            }
        }
        Ok(list)
    }

    /// `path` 是当前递归路径上的节点 id，只用于检测环；
    /// 同一节点出现在不同分支上是允许的。
    fn resolve_internal(
        &self,
        profile: &Profile,
        path: &mut Vec<i64>,
        in_chain: bool,
    ) -> Result<Vec<Profile>, BuildError> {
        if path.contains(&profile.id) {
            return Err(BuildError::CyclicReference(profile.id));
        }
        path.push(profile.id);

        let result = match &profile.bean {
            ProxyBean::Chain(chain) => {
                let mut list = Vec::new();
                for id in &chain.proxies {
                    let Some(member) = self.store.get_profile(*id) else {
                        log::debug!("Skipping missing chain member {} of {}", id, profile.id);
                        continue;
                    };
                    list.extend(self.resolve_internal(&member, path, true)?);
                }
                list.reverse();
                list
            }
            ProxyBean::ProxySet(set) => {
                if in_chain {
                    return Err(BuildError::ChainInProxySet(profile.id));
                }
                let mut list = self.set_members(profile.id, set)?;
                list.push(profile.clone());
                list
            }
            _ => vec![profile.clone()],
        };

        path.pop();
        Ok(result)
    }

    fn set_members(&self, set_id: i64, set: &ProxySetBean) -> Result<Vec<Profile>, BuildError> {
        let candidates = match &set.source {
            SetSource::List { proxies } => self.store.get_profiles(proxies),
            SetSource::Group {
                group_id,
                filter_not_regex,
            } => {
                let profiles = self.store.profiles_by_group(*group_id);
                if filter_not_regex.is_empty() {
                    profiles
                } else {
                    let regex = Regex::new(filter_not_regex).map_err(|e| {
                        BuildError::InvalidConfig(format!(
                            "invalid filter of proxy set {}: {}",
                            set_id, e
                        ))
                    })?;
                    profiles
                        .into_iter()
                        .filter(|p| !regex.is_match(&p.display_name()))
                        .collect()
                }
            }
        };

        let mut members = Vec::new();
        for member in candidates.into_iter().filter(|p| p.id != set_id) {
            match member.bean {
                ProxyBean::ProxySet(_) => return Err(BuildError::NestedProxySet(member.id)),
                ProxyBean::Chain(_) => return Err(BuildError::ChainInProxySet(member.id)),
                _ => members.push(member),
            }
        }

        if members.is_empty() {
            return Err(BuildError::InvalidConfig(format!(
                "proxy set {} has no members",
                set_id
            )));
        }
        Ok(members)
    }
}
