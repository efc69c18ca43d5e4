use anyhow::Result;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};

use super::{MemoryStore, ProfileStore, StoreSnapshot};
use crate::models::{Profile, ProxyGroup, RuleEntity};

/// JSON 文件存储
///
/// 数据保存在内存中，每次修改后整体写回文件。
pub struct JsonStore {
    path: PathBuf,
    memory: MemoryStore,
    write_lock: Mutex<()>,
}

impl JsonStore {
    /// 打开存储文件，不存在时创建并写入默认分组
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let snapshot = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str::<StoreSnapshot>(&content)?
        } else {
            log::info!("Store file not found, creating: {:?}", path);
            StoreSnapshot::default()
        };

        let store = Self {
            path,
            memory: MemoryStore::from_snapshot(snapshot),
            write_lock: Mutex::new(()),
        };
        store.ensure_ungrouped()?;
        store.persist()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.memory.snapshot())?;
        // 先写临时文件再替换，避免写到一半时损坏
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        log::debug!("Store saved to: {:?}", self.path);
        Ok(())
    }

    fn write<T>(&self, result: Result<T>) -> Result<T> {
        let value = result?;
        self.persist()?;
        Ok(value)
    }
}

impl ProfileStore for JsonStore {
    fn get_profile(&self, id: i64) -> Option<Profile> {
        self.memory.get_profile(id)
    }

    fn get_profiles(&self, ids: &[i64]) -> Vec<Profile> {
        self.memory.get_profiles(ids)
    }

    fn profiles_by_group(&self, group_id: i64) -> Vec<Profile> {
        self.memory.profiles_by_group(group_id)
    }

    fn insert_profile(&self, profile: Profile) -> Result<Profile> {
        self.write(self.memory.insert_profile(profile))
    }

    fn update_profiles(&self, profiles: &[Profile]) -> Result<()> {
        self.write(self.memory.update_profiles(profiles))
    }

    fn delete_profiles(&self, ids: &[i64]) -> Result<()> {
        self.write(self.memory.delete_profiles(ids))
    }

    fn get_group(&self, id: i64) -> Option<ProxyGroup> {
        self.memory.get_group(id)
    }

    fn all_groups(&self) -> Vec<ProxyGroup> {
        self.memory.all_groups()
    }

    fn insert_group(&self, group: ProxyGroup) -> Result<ProxyGroup> {
        self.write(self.memory.insert_group(group))
    }

    fn update_group(&self, group: &ProxyGroup) -> Result<()> {
        self.write(self.memory.update_group(group))
    }

    fn remove_group(&self, id: i64) -> Result<()> {
        self.write(self.memory.remove_group(id))
    }

    fn all_rules(&self) -> Vec<RuleEntity> {
        self.memory.all_rules()
    }

    fn insert_rule(&self, rule: RuleEntity) -> Result<RuleEntity> {
        self.write(self.memory.insert_rule(rule))
    }

    fn update_rule(&self, rule: &RuleEntity) -> Result<()> {
        self.write(self.memory.update_rule(rule))
    }

    fn delete_rule(&self, id: i64) -> Result<()> {
        self.write(self.memory.delete_rule(id))
    }

    /// 批量插入只写一次文件
    fn insert_profiles(&self, profiles: Vec<Profile>) -> Result<Vec<Profile>> {
        self.write(self.memory.insert_profiles(profiles))
    }
}
