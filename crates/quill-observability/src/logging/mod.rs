//! 结构化日志模块
//!
//! 提供基于 tracing 的结构化日志功能。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use quill_config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{time::UtcTime, writer::BoxMakeWriter},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

use crate::error::{ObservabilityError, Result};

/// 日志级别重新加载句柄类型
type ReloadHandle = Handle<EnvFilter, Registry>;

/// 日志管理器
#[derive(Debug)]
pub struct LogManager {
    /// 配置
    config: LoggingConfig,

    /// 当前生效的过滤表达式
    level: String,

    /// 过滤器重新加载句柄
    reload_handle: Option<Arc<RwLock<ReloadHandle>>>,

    /// 文件输出的后台写线程句柄，丢弃时刷新
    guard: Option<WorkerGuard>,
}

impl LogManager {
    /// 初始化全局日志订阅者
    ///
    /// `RUST_LOG` 存在时优先于配置中的级别。
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let level = std::env::var("RUST_LOG")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| config.level.as_str().to_string());

        let mut manager = Self {
            config: config.clone(),
            level,
            reload_handle: None,
            guard: None,
        };

        let filter = manager.build_filter(&manager.level)?;
        let (filter, reload_handle) = reload::Layer::new(filter);
        manager.reload_handle = Some(Arc::new(RwLock::new(reload_handle)));

        let to_file = manager.config.file.is_some();
        let writer = manager.build_writer()?;
        let registry = tracing_subscriber::registry().with(filter);

        let installed = if manager.config.json_format {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_timer(UtcTime::rfc_3339())
                .with_target(true)
                .with_writer(writer)
                .with_ansi(false);
            registry.with(layer).try_init()
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_timer(UtcTime::rfc_3339())
                .with_target(true)
                .with_writer(writer)
                .with_ansi(!to_file);
            registry.with(layer).try_init()
        };
        installed.map_err(|e| ObservabilityError::Install(e.to_string()))?;

        tracing::debug!(
            target: "quill_observability",
            "Log manager initialized with level: {}",
            manager.level
        );

        Ok(manager)
    }

    /// 构建环境过滤器
    fn build_filter(&self, level: &str) -> Result<EnvFilter> {
        build_filter(level, &self.config)
    }

    /// 构建输出目标：配置了文件则写文件，否则写 stderr
    fn build_writer(&mut self) -> Result<BoxMakeWriter> {
        let Some(file) = self.config.file.clone() else {
            return Ok(BoxMakeWriter::new(std::io::stderr));
        };

        let path = quill_config::expand_tilde(&file).ok_or_else(|| ObservabilityError::LogPath {
            path: file.clone(),
            reason: "home directory unknown",
        })?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let name = path.file_name().ok_or_else(|| ObservabilityError::LogPath {
            path: file.clone(),
            reason: "no file name",
        })?;

        std::fs::create_dir_all(&dir)?;
        let appender = tracing_appender::rolling::never(&dir, name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        self.guard = Some(guard);

        Ok(BoxMakeWriter::new(writer))
    }

    /// 动态更新日志级别
    pub fn update_level(&mut self, level: &str) -> Result<()> {
        let new_filter = self.build_filter(level)?;

        let handle = self
            .reload_handle
            .as_ref()
            .ok_or(ObservabilityError::NotInitialized)?;

        handle
            .write()
            .modify(|filter| {
                *filter = new_filter;
            })
            .map_err(|e| ObservabilityError::Install(e.to_string()))?;

        self.level = level.to_string();
        tracing::debug!(target: "quill_observability", "Log level updated to: {}", level);
        Ok(())
    }

    /// 当前生效的过滤表达式
    pub fn level(&self) -> &str {
        &self.level
    }

    /// 获取当前配置
    pub fn config(&self) -> &LoggingConfig {
        &self.config
    }
}

/// 由基础级别和按模块级别组成过滤器
fn build_filter(level: &str, config: &LoggingConfig) -> Result<EnvFilter> {
    let mut filter =
        EnvFilter::try_new(level).map_err(|e| ObservabilityError::invalid_filter(level, e))?;

    for (module, module_level) in &config.module_levels {
        let directive = format!("{}={}", module, module_level);
        let parsed = directive
            .parse()
            .map_err(|e| ObservabilityError::invalid_filter(directive.as_str(), e))?;
        filter = filter.add_directive(parsed);
    }

    Ok(filter)
}

/// 创建带有会话上下文的 span
pub fn create_session_span(session_id: &str) -> tracing::Span {
    tracing::info_span!("session", session_id = %session_id)
}

/// 创建工具调用的 span
pub fn create_tool_span(tool_name: &str, session_id: Option<&str>) -> tracing::Span {
    match session_id {
        Some(sess_id) => tracing::info_span!(
            "tool",
            tool = %tool_name,
            session_id = %sess_id,
        ),
        None => tracing::info_span!("tool", tool = %tool_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_build_filter_with_module_levels() {
        let mut config = LoggingConfig::default();
        config.module_levels = HashMap::from([("quill_session".to_string(), "debug".to_string())]);
        assert!(build_filter("info", &config).is_ok());

        config.module_levels = HashMap::from([("quill_session".to_string(), "loud".to_string())]);
        assert!(matches!(
            build_filter("info", &config),
            Err(ObservabilityError::InvalidFilter { directive, .. }) if directive == "quill_session=loud"
        ));
    }

    #[test]
    fn test_log_manager_init_to_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let log_path = temp_dir.path().join("logs").join("quill.log");
        let config = LoggingConfig {
            file: Some(log_path.to_string_lossy().to_string()),
            ..LoggingConfig::default()
        };

        let mut manager = LogManager::init(&config).unwrap();
        assert!(log_path.parent().unwrap().is_dir());

        manager.update_level("debug").unwrap();
        assert_eq!(manager.level(), "debug");
        assert!(manager.update_level("quill_session=loud").is_err());
    }

    #[test]
    fn test_create_spans() {
        let session_span = create_session_span("sess-456");
        if let Some(meta) = session_span.metadata() {
            assert_eq!(meta.name(), "session");
        }

        let tool_span = create_tool_span("sketch_pad_operations", Some("sess-456"));
        if let Some(meta) = tool_span.metadata() {
            assert_eq!(meta.name(), "tool");
        }
    }
}
