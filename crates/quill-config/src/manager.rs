use crate::config::{Config, ConfigError, ConfigResult};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// 配置管理器
#[derive(Clone)]
pub struct ConfigManager {
    path: PathBuf,
    config: Arc<RwLock<Config>>,
}

impl ConfigManager {
    /// 加载配置文件
    ///
    /// 文件不存在时写入默认配置。加载后应用环境变量覆盖并校验。
    pub async fn load(path: &Path) -> ConfigResult<Self> {
        let config = if path.exists() {
            info!("Loading config from {:?}", path);
            Self::read_file(path).await?
        } else {
            info!("Config file not found, creating default config at {:?}", path);
            let default_config = Config::default();
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let content = serde_json::to_string_pretty(&default_config)?;
            tokio::fs::write(path, &content).await?;
            Self::finish(default_config)?
        };

        Ok(Self {
            path: path.to_path_buf(),
            config: Arc::new(RwLock::new(config)),
        })
    }

    /// 读取、展开环境变量并解析配置文件
    async fn read_file(path: &Path) -> ConfigResult<Config> {
        let content = tokio::fs::read_to_string(path).await?;
        let content = Self::expand_env_vars(&content)?;
        Self::finish(serde_json::from_str(&content)?)
    }

    /// 应用环境变量覆盖后校验
    fn finish(mut config: Config) -> ConfigResult<Config> {
        config.apply_env_overrides()?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// 从默认位置加载配置
    pub async fn load_default() -> ConfigResult<Self> {
        let config_path = Self::default_config_path()?;
        Self::load(&config_path).await
    }

    /// 获取默认配置路径 (~/.quill/config.json)
    pub fn default_config_path() -> ConfigResult<PathBuf> {
        crate::default_config_path()
            .ok_or_else(|| ConfigError::InvalidPath("Could not find home directory".to_string()))
    }

    /// 创建一个新的配置管理器（用于测试）
    pub fn new(config: Config, path: PathBuf) -> Self {
        Self {
            path,
            config: Arc::new(RwLock::new(config)),
        }
    }

    /// 获取配置的共享引用
    pub fn get(&self) -> Arc<RwLock<Config>> {
        Arc::clone(&self.config)
    }

    /// 获取当前配置的副本
    pub async fn snapshot(&self) -> Config {
        self.config.read().await.clone()
    }

    /// 保存配置到文件
    pub async fn save(&self) -> ConfigResult<()> {
        self.save_to(&self.path).await?;
        info!("Config saved to {:?}", self.path);
        Ok(())
    }

    /// 保存配置到指定路径
    pub async fn save_to(&self, path: &Path) -> ConfigResult<()> {
        let config = self.config.read().await;
        let content = serde_json::to_string_pretty(&*config)?;
        drop(config);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// 重新加载配置
    pub async fn reload(&self) -> ConfigResult<()> {
        if !self.path.exists() {
            return Err(ConfigError::InvalidPath(format!(
                "Config file not found: {:?}",
                self.path
            )));
        }

        let new_config = Self::read_file(&self.path).await?;
        *self.config.write().await = new_config;

        info!("Config reloaded from {:?}", self.path);
        Ok(())
    }

    /// 更新配置，校验通过后保存
    pub async fn update<F>(&self, f: F) -> ConfigResult<()>
    where
        F: FnOnce(&mut Config),
    {
        let mut config = self.config.write().await;
        let mut candidate = config.clone();
        f(&mut candidate);
        Self::validate(&candidate)?;
        *config = candidate;
        drop(config);
        self.save().await
    }

    /// 按点分路径设置单个值并保存
    pub async fn set_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let mut config = self.config.write().await;
        let mut candidate = config.clone();
        candidate.set_value(key, value)?;
        Self::validate(&candidate)?;
        *config = candidate;
        drop(config);
        debug!("Config value updated: {} = {}", key, value);
        self.save().await
    }

    /// 验证配置
    pub fn validate(config: &Config) -> ConfigResult<()> {
        if config.sketch_pad.max_items == 0 {
            return Err(ConfigError::Validation(
                "sketch_pad.max_items must be greater than 0".to_string(),
            ));
        }

        if config.history.max_history_length == 0 {
            return Err(ConfigError::Validation(
                "history.max_history_length must be greater than 0".to_string(),
            ));
        }

        if config.summarizer.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "summarizer.timeout_secs must be greater than 0".to_string(),
            ));
        }

        if config.session.max_active_sessions == 0 {
            return Err(ConfigError::Validation(
                "session.max_active_sessions must be greater than 0".to_string(),
            ));
        }

        for (name, secs) in [
            ("session.auto_save_interval_secs", config.session.auto_save_interval_secs),
            ("session.cleanup_interval_secs", config.session.cleanup_interval_secs),
            ("session.sweep_interval_secs", config.session.sweep_interval_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::Validation(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        Ok(())
    }

    /// 展开环境变量 ${VAR} 或 ${VAR:-default}
    fn expand_env_vars(content: &str) -> ConfigResult<String> {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| ConfigError::Validation(format!("Invalid pattern: {}", e)))?;
        let mut result = content.to_string();

        for cap in re.captures_iter(content) {
            let full_match = &cap[0];
            let var_expr = &cap[1];

            let (var_name, default_value) = match var_expr.split_once(":-") {
                Some((name, default)) => (name, Some(default)),
                None => (var_expr, None),
            };

            let replacement = match (std::env::var(var_name), default_value) {
                (Ok(val), _) => val,
                (Err(_), Some(default)) => default.to_string(),
                (Err(_), None) => return Err(ConfigError::EnvVarNotFound(var_name.to_string())),
            };

            result = result.replace(full_match, &replacement);
        }

        Ok(result)
    }

    /// 获取配置文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_default_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        let manager = ConfigManager::load(&config_path).await.unwrap();
        let config = manager.snapshot().await;

        assert!(config_path.exists());
        assert_eq!(config.sketch_pad.max_items, 1000);
        assert_eq!(config.history.max_history_length, 10);
    }

    #[tokio::test]
    async fn test_env_var_expansion() {
        std::env::set_var("QUILL_TEST_EXPAND_DIR", "/var/quill");

        let content = r#"{"dir": "${QUILL_TEST_EXPAND_DIR}", "other": "${QUILL_TEST_UNSET_VAR:-fallback}"}"#;
        let expanded = ConfigManager::expand_env_vars(content).unwrap();

        assert!(expanded.contains("/var/quill"));
        assert!(expanded.contains("fallback"));

        let missing = ConfigManager::expand_env_vars(r#"{"x": "${QUILL_TEST_NEVER_SET}"}"#);
        assert!(matches!(missing, Err(ConfigError::EnvVarNotFound(_))));
    }

    #[tokio::test]
    async fn test_config_validation() {
        let mut config = Config::default();
        config.history.max_history_length = 0;
        assert!(ConfigManager::validate(&config).is_err());

        config.history.max_history_length = 5;
        assert!(ConfigManager::validate(&config).is_ok());

        config.sketch_pad.max_items = 0;
        assert!(ConfigManager::validate(&config).is_err());
    }

    #[tokio::test]
    async fn test_set_value_persists() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        let manager = ConfigManager::new(Config::default(), config_path.clone());

        manager.set_value("sketch_pad.max_items", "25").await.unwrap();
        assert!(manager.set_value("history.max_history_length", "0").await.is_err());

        let reloaded = ConfigManager::load(&config_path).await.unwrap();
        let config = reloaded.snapshot().await;
        assert_eq!(config.sketch_pad.max_items, 25);
        assert_eq!(config.history.max_history_length, 10);
    }
}
