use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 主配置结构体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sketch_pad: SketchPadConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            storage: StorageConfig::default(),
            sketch_pad: SketchPadConfig::default(),
            history: HistoryConfig::default(),
            session: SessionConfig::default(),
            summarizer: SummarizerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn parse_number<T: std::str::FromStr>(value: &str) -> ConfigResult<T> {
    value
        .parse()
        .map_err(|_| ConfigError::Validation(format!("Invalid number: {}", value)))
}

fn parse_bool(value: &str) -> ConfigResult<bool> {
    value
        .parse()
        .map_err(|_| ConfigError::Validation(format!("Invalid boolean: {}", value)))
}

impl Config {
    /// 获取配置值的快捷方法
    pub fn get_value(&self, key: &str) -> Option<String> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["version"] => Some(self.version.clone()),
            ["storage", "sketch_dir"] => Some(self.storage.sketch_dir.clone()),
            ["storage", "context_dir"] => Some(self.storage.context_dir.clone()),
            ["storage", "conversation_dir"] => Some(self.storage.conversation_dir.clone()),
            ["sketch_pad", "max_items"] => Some(self.sketch_pad.max_items.to_string()),
            ["sketch_pad", "auto_summarize_threshold"] => {
                Some(self.sketch_pad.auto_summarize_threshold.to_string())
            }
            ["sketch_pad", "summarize_prefix_chars"] => {
                Some(self.sketch_pad.summarize_prefix_chars.to_string())
            }
            ["sketch_pad", "search_prefix_chars"] => {
                Some(self.sketch_pad.search_prefix_chars.to_string())
            }
            ["history", "max_history_length"] => Some(self.history.max_history_length.to_string()),
            ["session", "idle_timeout_secs"] => Some(self.session.idle_timeout_secs.to_string()),
            ["session", "max_active_sessions"] => Some(self.session.max_active_sessions.to_string()),
            ["session", "auto_save_interval_secs"] => {
                Some(self.session.auto_save_interval_secs.to_string())
            }
            ["session", "cleanup_interval_secs"] => {
                Some(self.session.cleanup_interval_secs.to_string())
            }
            ["session", "sweep_interval_secs"] => Some(self.session.sweep_interval_secs.to_string()),
            ["session", "enable_maintenance"] => Some(self.session.enable_maintenance.to_string()),
            ["summarizer", "timeout_secs"] => Some(self.summarizer.timeout_secs.to_string()),
            ["logging", "level"] => Some(self.logging.level.as_str().to_string()),
            ["logging", "json_format"] => Some(self.logging.json_format.to_string()),
            ["logging", "file"] => self.logging.file.clone(),
            _ => None,
        }
    }

    /// 设置配置值
    pub fn set_value(&mut self, key: &str, value: &str) -> ConfigResult<()> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["storage", "sketch_dir"] => self.storage.sketch_dir = value.to_string(),
            ["storage", "context_dir"] => self.storage.context_dir = value.to_string(),
            ["storage", "conversation_dir"] => self.storage.conversation_dir = value.to_string(),
            ["sketch_pad", "max_items"] => self.sketch_pad.max_items = parse_number(value)?,
            ["sketch_pad", "auto_summarize_threshold"] => {
                self.sketch_pad.auto_summarize_threshold = parse_number(value)?
            }
            ["sketch_pad", "summarize_prefix_chars"] => {
                self.sketch_pad.summarize_prefix_chars = parse_number(value)?
            }
            ["sketch_pad", "search_prefix_chars"] => {
                self.sketch_pad.search_prefix_chars = parse_number(value)?
            }
            ["history", "max_history_length"] => {
                self.history.max_history_length = parse_number(value)?
            }
            ["session", "idle_timeout_secs"] => self.session.idle_timeout_secs = parse_number(value)?,
            ["session", "max_active_sessions"] => {
                self.session.max_active_sessions = parse_number(value)?
            }
            ["session", "auto_save_interval_secs"] => {
                self.session.auto_save_interval_secs = parse_number(value)?
            }
            ["session", "cleanup_interval_secs"] => {
                self.session.cleanup_interval_secs = parse_number(value)?
            }
            ["session", "sweep_interval_secs"] => {
                self.session.sweep_interval_secs = parse_number(value)?
            }
            ["session", "enable_maintenance"] => {
                self.session.enable_maintenance = parse_bool(value)?
            }
            ["summarizer", "timeout_secs"] => self.summarizer.timeout_secs = parse_number(value)?,
            ["logging", "level"] => self.logging.level = value.parse()?,
            ["logging", "json_format"] => self.logging.json_format = parse_bool(value)?,
            ["logging", "file"] => self.logging.file = Some(value.to_string()),
            _ => return Err(ConfigError::KeyNotFound(key.to_string())),
        }
        Ok(())
    }

    /// 用环境变量覆盖配置
    ///
    /// 支持 `QUILL_SKETCH_DIR`、`QUILL_CONTEXT_DIR`、`QUILL_CONVERSATION_DIR`、
    /// `QUILL_MAX_HISTORY_LENGTH`、`QUILL_LOG_LEVEL`。
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    pub(crate) fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        const OVERRIDES: &[(&str, &str)] = &[
            ("QUILL_SKETCH_DIR", "storage.sketch_dir"),
            ("QUILL_CONTEXT_DIR", "storage.context_dir"),
            ("QUILL_CONVERSATION_DIR", "storage.conversation_dir"),
            ("QUILL_MAX_HISTORY_LENGTH", "history.max_history_length"),
            ("QUILL_LOG_LEVEL", "logging.level"),
        ];

        for (var, key) in OVERRIDES {
            if let Some(value) = lookup(var) {
                self.set_value(key, &value)?;
            }
        }
        Ok(())
    }
}

/// 存储目录配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// SketchPad 快照目录
    pub sketch_dir: String,
    /// 对话历史快照目录
    pub context_dir: String,
    /// 会话标记文件目录
    pub conversation_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sketch_dir: "~/.quill/data/sketches".to_string(),
            context_dir: "~/.quill/data/contexts".to_string(),
            conversation_dir: "~/.quill/data/conversations".to_string(),
        }
    }
}

/// SketchPad 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SketchPadConfig {
    /// 最大条目数
    pub max_items: usize,
    /// 超过该长度的值才会自动生成摘要
    pub auto_summarize_threshold: usize,
    /// 送去摘要的前缀长度
    pub summarize_prefix_chars: usize,
    /// 内容搜索时扫描的值前缀长度
    pub search_prefix_chars: usize,
}

impl Default for SketchPadConfig {
    fn default() -> Self {
        Self {
            max_items: 1000,
            auto_summarize_threshold: 100,
            summarize_prefix_chars: 2000,
            search_prefix_chars: 500,
        }
    }
}

/// 对话历史配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryConfig {
    /// 超过后触发摘要压缩
    pub max_history_length: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_history_length: 10,
        }
    }
}

/// 会话管理配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// 空闲超过该时间的会话会被持久化并移出内存
    pub idle_timeout_secs: u64,
    /// 最大活跃会话数
    pub max_active_sessions: usize,
    /// 自动保存间隔
    pub auto_save_interval_secs: u64,
    /// 空闲清理间隔
    pub cleanup_interval_secs: u64,
    /// 过期条目清扫间隔
    pub sweep_interval_secs: u64,
    /// 启用后台维护任务
    #[serde(default = "default_true")]
    pub enable_maintenance: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 3600,
            max_active_sessions: 100,
            auto_save_interval_secs: 60,
            cleanup_interval_secs: 300,
            sweep_interval_secs: 60,
            enable_maintenance: true,
        }
    }
}

/// 摘要调用配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummarizerConfig {
    /// 单次摘要调用的超时
    pub timeout_secs: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self { timeout_secs: 60 }
    }
}

/// 日志级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ConfigError::Validation(format!("Invalid log level: {}", s))),
        }
    }
}

/// Logging 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub level: LogLevel,
    #[serde(default)]
    pub json_format: bool,
    #[serde(default)]
    pub file: Option<String>,
    /// 按模块覆盖的日志级别，例如 `{"quill_session": "debug"}`
    #[serde(default)]
    pub module_levels: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json_format: false,
            file: None,
            module_levels: HashMap::new(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sketch_pad.max_items, 1000);
        assert_eq!(config.history.max_history_length, 10);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_get_set_value() {
        let mut config = Config::default();
        config.set_value("sketch_pad.max_items", "50").unwrap();
        assert_eq!(config.get_value("sketch_pad.max_items").as_deref(), Some("50"));

        config.set_value("logging.level", "WARNING").unwrap();
        assert_eq!(config.get_value("logging.level").as_deref(), Some("warn"));

        assert!(matches!(
            config.set_value("sketch_pad.max_items", "many"),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            config.set_value("nope.nothing", "1"),
            Err(ConfigError::KeyNotFound(_))
        ));
        assert!(config.get_value("nope").is_none());
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(|name| match name {
                "QUILL_SKETCH_DIR" => Some("/srv/sketches".to_string()),
                "QUILL_MAX_HISTORY_LENGTH" => Some("4".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.storage.sketch_dir, "/srv/sketches");
        assert_eq!(config.history.max_history_length, 4);
        assert_eq!(config.storage.context_dir, StorageConfig::default().context_dir);
    }

    #[test]
    fn test_partial_file_uses_section_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"version": "0.1.0", "history": {"max_history_length": 3}}"#,
        )
        .unwrap();
        assert_eq!(config.history.max_history_length, 3);
        assert_eq!(config.sketch_pad, SketchPadConfig::default());
    }
}
