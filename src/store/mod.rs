//! 节点 / 分组 / 规则的持久化接口
//!
//! 构建与订阅更新只通过 [`ProfileStore`] 访问数据，具体存储可以是内存或 JSON 文件。

mod json;
mod memory;

pub use json::*;
pub use memory::*;

use anyhow::Result;

use crate::models::{Profile, ProxyGroup, RuleEntity};

pub trait ProfileStore: Send + Sync {
    fn get_profile(&self, id: i64) -> Option<Profile>;

    /// 按给定 id 顺序返回，不存在的 id 跳过
    fn get_profiles(&self, ids: &[i64]) -> Vec<Profile>;

    /// 分组内的节点，按 `user_order` 排序
    fn profiles_by_group(&self, group_id: i64) -> Vec<Profile>;

    /// 插入节点并分配 id
    fn insert_profile(&self, profile: Profile) -> Result<Profile>;

    fn update_profiles(&self, profiles: &[Profile]) -> Result<()>;

    fn delete_profiles(&self, ids: &[i64]) -> Result<()>;

    fn get_group(&self, id: i64) -> Option<ProxyGroup>;

    /// 全部分组，按 `user_order` 排序
    fn all_groups(&self) -> Vec<ProxyGroup>;

    fn insert_group(&self, group: ProxyGroup) -> Result<ProxyGroup>;

    fn update_group(&self, group: &ProxyGroup) -> Result<()>;

    /// 只删除分组本身
    fn remove_group(&self, id: i64) -> Result<()>;

    /// 全部规则，按 `user_order` 排序
    fn all_rules(&self) -> Vec<RuleEntity>;

    fn insert_rule(&self, rule: RuleEntity) -> Result<RuleEntity>;

    fn update_rule(&self, rule: &RuleEntity) -> Result<()>;

    fn delete_rule(&self, id: i64) -> Result<()>;

    /// 参与编译的规则
    fn enabled_rules(&self) -> Vec<RuleEntity> {
        self.all_rules().into_iter().filter(|r| r.enabled).collect()
    }

    fn update_profile(&self, profile: &Profile) -> Result<()> {
        self.update_profiles(std::slice::from_ref(profile))
    }

    fn insert_profiles(&self, profiles: Vec<Profile>) -> Result<Vec<Profile>> {
        profiles
            .into_iter()
            .map(|profile| self.insert_profile(profile))
            .collect()
    }

    /// 分组内下一个排序值
    fn next_order(&self, group_id: i64) -> i64 {
        self.profiles_by_group(group_id)
            .iter()
            .map(|p| p.user_order)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// 默认分组，不存在时创建
    fn ensure_ungrouped(&self) -> Result<ProxyGroup> {
        if let Some(group) = self.all_groups().into_iter().find(|g| g.ungrouped) {
            return Ok(group);
        }
        log::info!("Creating default ungrouped group");
        self.insert_group(ProxyGroup::ungrouped())
    }

    /// 删除分组及其全部节点
    fn delete_group(&self, id: i64) -> Result<()> {
        self.clear_group(id)?;
        self.remove_group(id)?;
        // 默认分组被删除后重新创建
        self.ensure_ungrouped()?;
        Ok(())
    }

    /// 清空分组内的节点
    fn clear_group(&self, id: i64) -> Result<()> {
        let ids: Vec<i64> = self.profiles_by_group(id).iter().map(|p| p.id).collect();
        if ids.is_empty() {
            return Ok(());
        }
        self.delete_profiles(&ids)
    }

    /// 把分组内的排序值重排为 1..n
    fn rearrange(&self, group_id: i64) -> Result<()> {
        let mut profiles = self.profiles_by_group(group_id);
        let mut changed = Vec::new();
        for (index, profile) in profiles.iter_mut().enumerate() {
            let order = index as i64 + 1;
            if profile.user_order != order {
                profile.user_order = order;
                changed.push(profile.clone());
            }
        }
        if changed.is_empty() {
            return Ok(());
        }
        self.update_profiles(&changed)
    }
}
