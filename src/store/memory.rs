use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ProfileStore;
use crate::models::{Profile, ProxyGroup, RuleEntity};

/// 存储的完整内容，也是 JSON 文件的格式
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSnapshot {
    pub next_profile_id: i64,
    pub next_group_id: i64,
    pub next_rule_id: i64,
    pub profiles: BTreeMap<i64, Profile>,
    pub groups: BTreeMap<i64, ProxyGroup>,
    pub rules: BTreeMap<i64, RuleEntity>,
}

impl StoreSnapshot {
    fn allocate(counter: &mut i64, max_existing: Option<i64>) -> i64 {
        // 快照可能是手工编辑的，计数器不能落后于已有 id
        let next = (*counter).max(max_existing.unwrap_or(0)) + 1;
        *counter = next;
        next
    }
}

/// 内存存储，读多写少
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<StoreSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            inner: RwLock::new(snapshot),
        }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.inner.read().clone()
    }
}

fn sorted_by_order<T>(items: impl Iterator<Item = T>, key: impl Fn(&T) -> (i64, i64)) -> Vec<T> {
    let mut items: Vec<T> = items.collect();
    items.sort_by_key(key);
    items
}

impl ProfileStore for MemoryStore {
    fn get_profile(&self, id: i64) -> Option<Profile> {
        self.inner.read().profiles.get(&id).cloned()
    }

    fn get_profiles(&self, ids: &[i64]) -> Vec<Profile> {
        let inner = self.inner.read();
        ids.iter()
            .filter_map(|id| inner.profiles.get(id).cloned())
            .collect()
    }

    fn profiles_by_group(&self, group_id: i64) -> Vec<Profile> {
        let inner = self.inner.read();
        sorted_by_order(
            inner
                .profiles
                .values()
                .filter(|p| p.group_id == group_id)
                .cloned(),
            |p| (p.user_order, p.id),
        )
    }

    fn insert_profile(&self, mut profile: Profile) -> Result<Profile> {
        let mut inner = self.inner.write();
        let max = inner.profiles.keys().next_back().copied();
        profile.id = StoreSnapshot::allocate(&mut inner.next_profile_id, max);
        inner.profiles.insert(profile.id, profile.clone());
        Ok(profile)
    }

    fn update_profiles(&self, profiles: &[Profile]) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(missing) = profiles.iter().find(|p| !inner.profiles.contains_key(&p.id)) {
            return Err(anyhow!("Profile not found: {}", missing.id));
        }
        for profile in profiles {
            inner.profiles.insert(profile.id, profile.clone());
        }
        Ok(())
    }

    fn delete_profiles(&self, ids: &[i64]) -> Result<()> {
        let mut inner = self.inner.write();
        for id in ids {
            inner.profiles.remove(id);
        }
        Ok(())
    }

    fn get_group(&self, id: i64) -> Option<ProxyGroup> {
        self.inner.read().groups.get(&id).cloned()
    }

    fn all_groups(&self) -> Vec<ProxyGroup> {
        let inner = self.inner.read();
        sorted_by_order(inner.groups.values().cloned(), |g| (g.user_order, g.id))
    }

    fn insert_group(&self, mut group: ProxyGroup) -> Result<ProxyGroup> {
        let mut inner = self.inner.write();
        if group.ungrouped && inner.groups.values().any(|g| g.ungrouped) {
            return Err(anyhow!("Ungrouped group already exists"));
        }
        let max = inner.groups.keys().next_back().copied();
        group.id = StoreSnapshot::allocate(&mut inner.next_group_id, max);
        if group.user_order == 0 {
            group.user_order = group.id;
        }
        inner.groups.insert(group.id, group.clone());
        Ok(group)
    }

    fn update_group(&self, group: &ProxyGroup) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.groups.get_mut(&group.id) {
            Some(existing) => {
                *existing = group.clone();
                Ok(())
            }
            None => Err(anyhow!("Group not found: {}", group.id)),
        }
    }

    fn remove_group(&self, id: i64) -> Result<()> {
        self.inner.write().groups.remove(&id);
        Ok(())
    }

    fn all_rules(&self) -> Vec<RuleEntity> {
        let inner = self.inner.read();
        sorted_by_order(inner.rules.values().cloned(), |r| (r.user_order, r.id))
    }

    fn insert_rule(&self, mut rule: RuleEntity) -> Result<RuleEntity> {
        let mut inner = self.inner.write();
        let max = inner.rules.keys().next_back().copied();
        rule.id = StoreSnapshot::allocate(&mut inner.next_rule_id, max);
        if rule.user_order == 0 {
            rule.user_order = rule.id;
        }
        inner.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    fn update_rule(&self, rule: &RuleEntity) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.rules.get_mut(&rule.id) {
            Some(existing) => {
                *existing = rule.clone();
                Ok(())
            }
            None => Err(anyhow!("Rule not found: {}", rule.id)),
        }
    }

    fn delete_rule(&self, id: i64) -> Result<()> {
        self.inner.write().rules.remove(&id);
        Ok(())
    }
}
