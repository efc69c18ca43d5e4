use anyhow::{anyhow, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::BuildSettings;
use crate::rules::build_dns_server;
use crate::utils::get_settings_path;

/// 构建设置管理器
pub struct SettingsManager {
    settings_path: PathBuf,
}

impl SettingsManager {
    /// 使用数据目录下的 settings.json
    pub fn new() -> Result<Self> {
        Ok(Self {
            settings_path: get_settings_path()?,
        })
    }

    /// 使用指定路径
    pub fn with_path(path: impl AsRef<Path>) -> Self {
        Self {
            settings_path: path.as_ref().to_path_buf(),
        }
    }

    pub fn settings_path(&self) -> &PathBuf {
        &self.settings_path
    }

    /// 加载设置，文件不存在时写入默认设置
    pub fn load(&self) -> Result<BuildSettings> {
        if !self.settings_path.exists() {
            log::info!("Settings file not found, creating default settings");
            let settings = BuildSettings::default();
            self.save(&settings)?;
            return Ok(settings);
        }

        let content = fs::read_to_string(&self.settings_path)?;
        let settings: BuildSettings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    /// 保存设置
    pub fn save(&self, settings: &BuildSettings) -> Result<()> {
        // 确保目录存在
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(settings)?;
        fs::write(&self.settings_path, json)?;
        log::info!("Settings saved to: {:?}", self.settings_path);
        Ok(())
    }

    /// 检查设置能否生成配置
    pub fn validate(&self, settings: &BuildSettings) -> Result<()> {
        if settings.mixed_port == 0 {
            return Err(anyhow!("Invalid mixed port"));
        }
        if settings.local_dns_port == 0 {
            return Err(anyhow!("Invalid local DNS port"));
        }
        if settings.mixed_port == settings.local_dns_port {
            return Err(anyhow!(
                "Mixed port and local DNS port must differ: {}",
                settings.mixed_port
            ));
        }
        if settings.log_level > 6 {
            return Err(anyhow!("Invalid log level: {}", settings.log_level));
        }

        // 每个 DNS 地址都必须能解析
        for link in settings
            .remote_dns_list()
            .iter()
            .chain(settings.direct_dns_list().iter())
            .chain(settings.underlying_dns_list().iter())
        {
            build_dns_server(link, None, "check", None)?;
        }
        Ok(())
    }

    /// 更新当前节点
    pub fn update_selected_proxy(&self, id: i64) -> Result<()> {
        let mut settings = self.load()?;
        settings.selected_proxy = id;
        self.save(&settings)
    }

    /// 按函数修改后保存
    pub fn update<F>(&self, f: F) -> Result<BuildSettings>
    where
        F: FnOnce(&mut BuildSettings),
    {
        let mut settings = self.load()?;
        f(&mut settings);
        self.validate(&settings)?;
        self.save(&settings)?;
        Ok(settings)
    }
}
