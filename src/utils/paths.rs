use anyhow::Result;
use std::path::PathBuf;

/// 获取应用数据目录
///
/// 可通过 `CONFLUX_DATA_DIR` 覆盖，便于测试与便携部署。
pub fn get_app_data_dir() -> Result<PathBuf> {
    let path = match std::env::var_os("CONFLUX_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find data directory"))?
            .join("Conflux"),
    };

    std::fs::create_dir_all(&path)?;
    Ok(path)
}

/// 获取构建设置文件路径
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_app_data_dir()?.join("settings.json"))
}

/// 获取节点数据库文件路径
pub fn get_store_path() -> Result<PathBuf> {
    Ok(get_app_data_dir()?.join("profiles.json"))
}

/// 获取本地规则集目录
pub fn get_assets_dir() -> Result<PathBuf> {
    let dir = get_app_data_dir()?.join("geo");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// 引擎缓存文件相对路径
pub const CACHE_FILE_PATH: &str = "../cache/cache.db";
