// 本地数据持久化服务

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::constants::{CONFIG_DIR, POOL_FILE, SETTINGS_FILE};
use crate::models::AppSettings;
use crate::pool::PoolSnapshot;

/// 获取配置目录路径
/// macOS: ~/Library/Application Support/sshpool
/// Linux: ~/.config/sshpool
/// Windows: C:\Users\<用户名>\AppData\Roaming\sshpool
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("无法获取系统配置目录")?
        .join(CONFIG_DIR);
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir).context("无法创建配置目录")?;
    }
    Ok(config_dir)
}

// ======================== Settings 配置持久化 ========================

/// 获取设置配置文件路径
pub fn get_settings_file() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(SETTINGS_FILE))
}

/// 加载应用设置
pub fn load_settings() -> Result<AppSettings> {
    let path = get_settings_file()?;
    if !path.exists() {
        return Ok(AppSettings::default());
    }
    let content = fs::read_to_string(&path).context("无法读取设置配置文件")?;
    let settings: AppSettings = serde_json::from_str(&content).context("无法解析设置配置文件")?;
    Ok(settings)
}

/// 保存应用设置
pub fn save_settings(settings: &AppSettings) -> Result<()> {
    let path = get_settings_file()?;
    let content = serde_json::to_string_pretty(settings).context("无法序列化设置配置")?;
    fs::write(&path, content).context("无法写入设置配置文件")?;
    Ok(())
}

// ======================== 池状态快照持久化 ========================

/// 获取池快照文件路径
pub fn get_pool_file() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(POOL_FILE))
}

/// 加载池快照，文件不存在返回 None
pub fn load_pool() -> Result<Option<PoolSnapshot>> {
    let path = get_pool_file()?;
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path).context("无法读取池快照文件")?;
    let snapshot: PoolSnapshot = serde_json::from_str(&content).context("无法解析池快照文件")?;
    Ok(Some(snapshot))
}

/// 保存池快照
pub fn save_pool(snapshot: &PoolSnapshot) -> Result<()> {
    let path = get_pool_file()?;
    let content = serde_json::to_string_pretty(snapshot).context("无法序列化池快照")?;
    fs::write(&path, content).context("无法写入池快照文件")?;
    Ok(())
}
