//! # Store Error Types
//!
//! 定义存储系统相关的错误类型。
//!
//! 查不到键、条目过期、摘要超时这类日常情况不是错误，
//! 由 `Option` / `bool` 表达；这里只保留需要调用方处理的失败。

use quill_core::ValidationError;
use thiserror::Error;

/// 存储错误类型
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化/反序列化错误
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 消息不合法
    #[error("Invalid message: {0}")]
    Validation(#[from] ValidationError),

    /// 参数不合法
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// 会话不存在
    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    /// 当前没有进入任何会话
    #[error("No active session: enter a session scope before using the current store")]
    NoActiveSession,

    /// 已在一个会话作用域内时再次进入
    #[error("Cannot nest session scopes: '{active}' is active, tried to enter '{requested}'")]
    NestedScope { active: String, requested: String },

    /// 快速层不可用
    #[error("Fast tier unavailable: {message}")]
    BackendUnavailable { message: String },

    /// 配置错误
    #[error("Configuration error: {message}")]
    ConfigError { message: String },
}

impl StoreError {
    /// 创建参数错误
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// 创建快速层不可用错误
    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
        }
    }

    /// 创建配置错误
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// 是否为调用方违约（而不是环境故障）
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::InvalidArgument { .. }
                | Self::NoActiveSession
                | Self::NestedScope { .. }
        )
    }
}

/// 存储结果类型
pub type StoreResult<T> = Result<T, StoreError>;
