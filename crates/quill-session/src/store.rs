//! # Store Traits
//!
//! 定义存储后端需要实现的接口：键值存储接口与快照持久化接口。

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreResult;
use crate::item::SketchItem;

/// 快照持久化接口
///
/// SketchPad 与对话历史共用同一套协议：结构化导出/导入，
/// 以及落盘/恢复。持久化失败以 `false` 表示，不向上抛错。
#[async_trait]
pub trait Snapshot: Send + Sync {
    /// 快照数据类型
    type Data: Send;

    /// 导出完整状态（不含可重建的索引）
    async fn serialize(&self) -> Self::Data;

    /// 用快照替换当前状态，返回载入的条目数
    ///
    /// 单个条目损坏只跳过该条目。
    async fn deserialize(&self, data: Self::Data) -> usize;

    /// 原子写入持久层
    async fn persist(&self) -> bool;

    /// 从持久层恢复；文件缺失或损坏时返回 `false` 且状态不变
    async fn restore(&self) -> bool;

    /// 快照文件路径
    fn file_path(&self) -> &Path;
}

/// 通用键值存储接口
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// 写入条目，返回实际使用的键（可能带有后缀）
    async fn set(&self, request: SetRequest) -> StoreResult<String>;

    /// 读取未过期的条目，并更新访问计数
    async fn get(&self, key: &str) -> Option<SketchItem>;

    /// 只取值
    async fn get_value(&self, key: &str) -> Option<Value> {
        self.get(key).await.map(|item| item.value)
    }

    /// 按标签搜索；`match_all` 为真时要求条目包含全部标签
    async fn search_by_tags(&self, tags: &BTreeSet<String>, match_all: bool)
        -> Vec<(String, SketchItem)>;

    /// 按内容搜索，按访问次数与最近访问时间排序
    async fn search_by_content(&self, query: &str, limit: usize) -> Vec<(String, SketchItem)>;

    async fn delete(&self, key: &str) -> bool;

    async fn exists(&self, key: &str) -> bool;

    /// 列出键，可用 glob 模式过滤
    async fn keys(&self, pattern: Option<&str>) -> Vec<String>;

    async fn clear(&self);
}

/// 一次写入请求
///
/// 键冲突时不会覆盖已有条目：内容相同则把新的标签、过期时间和摘要合并进已有条目
/// 并返回原键，否则写入 `{key}_1`、`{key}_2` ……；设置 `overwrite` 才会原地替换。
/// 调用方需要自行比较请求的键与返回的键。
#[derive(Debug, Clone, PartialEq)]
pub struct SetRequest {
    pub key: Option<String>,
    pub value: Value,
    pub ttl: Option<Duration>,
    pub summary: Option<String>,
    pub tags: BTreeSet<String>,
    pub auto_summarize: bool,
    pub overwrite: bool,
}

impl SetRequest {
    /// 创建写入请求，键缺省时自动生成
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            key: None,
            value: value.into(),
            ttl: None,
            summary: None,
            tags: BTreeSet::new(),
            auto_summarize: true,
            overwrite: false,
        }
    }

    /// 设置键
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// 设置过期时间，零表示永不过期
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// 以秒设置过期时间
    pub fn with_ttl_secs(self, secs: u64) -> Self {
        self.with_ttl(Duration::from_secs(secs))
    }

    /// 设置摘要（不再自动生成）
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// 设置标签
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// 追加一个标签
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// 是否对长值自动生成摘要
    pub fn auto_summarize(mut self, enabled: bool) -> Self {
        self.auto_summarize = enabled;
        self
    }

    /// 键已存在时原地替换
    pub fn overwrite(mut self, enabled: bool) -> Self {
        self.overwrite = enabled;
        self
    }
}

/// 解析逗号分隔的标签串
pub fn parse_tags(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
