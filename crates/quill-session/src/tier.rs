//! # Fast Tier
//!
//! 快速层是进程内共享的键值资源，命令集与网络缓存类似（字符串与集合）。
//! 所有会话通过带命名空间的键共用同一个快速层，见 [`Namespace`]。

use std::collections::BTreeSet;
use std::fmt::Debug;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{StoreError, StoreResult};

/// 快速层后端接口
///
/// 连接问题以 [`StoreError::BackendUnavailable`] 报告，
/// 存储收到该错误后切换到私有内存层。
#[async_trait]
pub trait FastTier: Send + Sync + Debug {
    /// 后端名称，用于日志
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: String) -> StoreResult<()>;

    /// 删除键，返回实际存在的数量
    async fn delete(&self, keys: &[String]) -> StoreResult<usize>;

    /// 以 `prefix` 开头的所有键，不保证顺序
    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()>;

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()>;

    async fn set_members(&self, key: &str) -> StoreResult<BTreeSet<String>>;

    async fn ping(&self) -> StoreResult<()>;
}

#[derive(Debug, Clone)]
enum TierValue {
    Str(String),
    Set(BTreeSet<String>),
}

/// 基于并发哈希表的进程内快速层
///
/// 一个进程内的所有会话共享同一个实例（放在 `Arc` 中）。
#[derive(Debug, Default)]
pub struct MemoryTier {
    entries: DashMap<String, TierValue>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// 原始键数量，包括标签集合
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn wrong_type(key: &str) -> StoreError {
        StoreError::invalid_argument(format!("fast tier key holds the wrong kind of value: {}", key))
    }
}

#[async_trait]
impl FastTier for MemoryTier {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self.entries.get(key).map(|e| e.value().clone()) {
            None => Ok(None),
            Some(TierValue::Str(s)) => Ok(Some(s)),
            Some(TierValue::Set(_)) => Err(Self::wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: String) -> StoreResult<()> {
        self.entries.insert(key.to_string(), TierValue::Str(value));
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<usize> {
        Ok(keys
            .iter()
            .filter(|k| self.entries.remove(k.as_str()).is_some())
            .count())
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| TierValue::Set(BTreeSet::new()));
        match entry.value_mut() {
            TierValue::Set(members) => {
                members.insert(member.to_string());
                Ok(())
            }
            TierValue::Str(_) => Err(Self::wrong_type(key)),
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        let now_empty = match self.entries.get_mut(key) {
            None => return Ok(()),
            Some(mut entry) => match entry.value_mut() {
                TierValue::Set(members) => {
                    members.remove(member);
                    members.is_empty()
                }
                TierValue::Str(_) => return Err(Self::wrong_type(key)),
            },
        };
        if now_empty {
            self.entries
                .remove_if(key, |_, v| matches!(v, TierValue::Set(m) if m.is_empty()));
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<BTreeSet<String>> {
        match self.entries.get(key).map(|e| e.value().clone()) {
            None => Ok(BTreeSet::new()),
            Some(TierValue::Set(members)) => Ok(members),
            Some(TierValue::Str(_)) => Err(Self::wrong_type(key)),
        }
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// 单个 SketchPad 在共享快速层中的键布局：
/// `sketch_pad:{id}:item:{key}` 与 `sketch_pad:{id}:tag:{tag}`
#[derive(Debug, Clone)]
pub(crate) struct Namespace {
    root: String,
    items: String,
    tags: String,
}

impl Namespace {
    pub(crate) fn new(pad_id: &str) -> Self {
        let root = format!("sketch_pad:{}:", pad_id);
        Self {
            items: format!("{}item:", root),
            tags: format!("{}tag:", root),
            root,
        }
    }

    pub(crate) fn root(&self) -> &str {
        &self.root
    }

    pub(crate) fn items_prefix(&self) -> &str {
        &self.items
    }

    pub(crate) fn item(&self, key: &str) -> String {
        format!("{}{}", self.items, key)
    }

    pub(crate) fn tag(&self, tag: &str) -> String {
        format!("{}{}", self.tags, tag)
    }

    /// 从原始键中去掉条目前缀
    pub(crate) fn item_key<'a>(&self, raw: &'a str) -> Option<&'a str> {
        raw.strip_prefix(self.items.as_str())
    }
}
