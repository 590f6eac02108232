pub mod config;
pub mod manager;

pub use config::{
    Config, ConfigError, ConfigResult, HistoryConfig, LogLevel, LoggingConfig, SessionConfig,
    SketchPadConfig, StorageConfig, SummarizerConfig,
};
pub use manager::ConfigManager;

use std::path::PathBuf;

/// 获取 Quill 配置目录路径
pub fn quill_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".quill"))
}

/// 获取默认配置文件路径
pub fn default_config_path() -> Option<PathBuf> {
    quill_dir().map(|dir| dir.join("config.json"))
}

/// 初始化 Quill 目录结构
pub async fn init_quill_dirs(config: &Config) -> ConfigResult<()> {
    for dir in [
        &config.storage.sketch_dir,
        &config.storage.context_dir,
        &config.storage.conversation_dir,
    ] {
        let path = expand_tilde(dir)
            .ok_or_else(|| ConfigError::InvalidPath(format!("Cannot expand path: {}", dir)))?;
        tokio::fs::create_dir_all(&path).await?;
    }
    Ok(())
}

/// 展开路径中的 ~ 为用户主目录
pub fn expand_tilde(path: &str) -> Option<PathBuf> {
    if path == "~" {
        return dirs::home_dir();
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return dirs::home_dir().map(|home| home.join(rest));
    }
    Some(PathBuf::from(path))
}
