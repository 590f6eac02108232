//! # Quill Session Storage
//!
//! Quill Agent 的会话级存储。
//!
//! ## 功能特性
//!
//! - **SketchPad**：键值草稿存储，支持 TTL、LRU 淘汰、标签索引、内容搜索和自动摘要
//! - **History**：有上限的对话历史，超出上限时摘要压缩
//! - **快速层 / 持久层**：条目放在共享快速层（按会话 id 划分命名空间），
//!   快照以 JSON 文件保存；快速层失效时自动降级为私有内存层
//! - **会话作用域**：进入会话后可直接获取当前会话的存储
//! - **SessionManager**：会话的创建、恢复、容量控制和后台维护
//!
//! ## 存储结构
//!
//! ```text
//! <data_dir>/
//! ├── sketches/
//! │   └── skt_<session_id>.json     # SketchPad 快照
//! ├── contexts/
//! │   └── ctx_<session_id>.json     # History 快照
//! └── conversations/
//!     └── conv_<session_id>.marker  # 会话标记
//! ```
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use quill_session::{
//!     current_sketch_pad, KeyValueStore, SessionManager, SessionManagerConfig, SetRequest,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = SessionManager::new(SessionManagerConfig::default()).await?;
//!     let session = manager.create_session(Some("demo")).await?;
//!
//!     session
//!         .enter(async {
//!             let pad = current_sketch_pad()?;
//!             pad.set(SetRequest::new("cargo test passed").with_tag("build")).await
//!         })
//!         .await??;
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

mod durable;
pub mod error;
pub mod history;
pub mod item;
pub mod session;
pub mod session_manager;
pub mod sketch_pad;
pub mod store;
pub mod tier;

use std::path::PathBuf;

pub use error::{StoreError, StoreResult};
pub use history::{History, HistoryConfig, HistoryMetadata, HistorySnapshot};
pub use item::{ContentType, SketchItem, SketchListItem, SketchPadStatistics};
pub use session::{
    current_history, current_session, current_sketch_pad, in_session_scope, Session,
};
pub use session_manager::{
    validate_session_id, SessionInfo, SessionManager, SessionManagerConfig,
};
pub use sketch_pad::{SketchPad, SketchPadConfig, SketchSnapshot};
pub use store::{parse_tags, KeyValueStore, SetRequest, Snapshot};
pub use tier::{FastTier, MemoryTier};

// 重新导出常用的核心类型
pub use quill_core::{Clock, ManualClock, Message, Role, SummarizeError, Summarizer, SystemClock};

/// 默认数据目录 `~/.quill/data`
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".quill")
        .join("data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_data_dir() {
        let dir = default_data_dir();
        assert!(dir.ends_with(".quill/data"));
    }
}
