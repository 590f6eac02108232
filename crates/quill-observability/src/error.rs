//! 日志初始化错误

/// 观测性错误类型
#[derive(Debug, thiserror::Error)]
pub enum ObservabilityError {
    /// 级别或模块过滤表达式无法解析
    #[error("Invalid log filter '{directive}': {reason}")]
    InvalidFilter {
        /// 出错的表达式
        directive: String,
        /// 解析器给出的原因
        reason: String,
    },

    /// 日志文件路径不可用
    #[error("Invalid log file path '{path}': {reason}")]
    LogPath {
        /// 配置中的路径
        path: String,
        /// 原因
        reason: &'static str,
    },

    /// 全局订阅者已存在或安装失败
    #[error("Failed to install subscriber: {0}")]
    Install(String),

    /// 尚未初始化就调整级别
    #[error("Log manager not initialized")]
    NotInitialized,

    /// 创建日志目录失败
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ObservabilityError {
    pub(crate) fn invalid_filter(directive: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidFilter {
            directive: directive.into(),
            reason: reason.to_string(),
        }
    }
}

/// 结果类型
pub type Result<T> = std::result::Result<T, ObservabilityError>;
