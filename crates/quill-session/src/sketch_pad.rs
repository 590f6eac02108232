//! # SketchPad
//!
//! 会话级的草稿存储：工具输出、生成的代码、命令结果、已确认的需求等，
//! 可按键读取，也可按标签或内容查找。
//!
//! 条目存放在共享的快速层中（按会话 id 划分命名空间），
//! 持久层是单个 JSON 快照文件。快速层不可用时，
//! 该实例切换到私有内存层并从快照重新装载，继续提供服务。

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quill_core::{Clock, Summarizer, SystemClock};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::durable;
use crate::error::{StoreError, StoreResult};
use crate::item::{
    char_prefix, content_hash, stringify, SketchItem, SketchListItem, SketchPadStatistics,
};
use crate::store::{KeyValueStore, SetRequest, Snapshot};
use crate::tier::{FastTier, MemoryTier, Namespace};

/// 统计中展示的热门标签数量
const POPULAR_TAG_LIMIT: usize = 10;

/// 生成键时的随机尝试次数
const AUTO_KEY_ATTEMPTS: usize = 8;

/// SketchPad 配置
#[derive(Debug, Clone)]
pub struct SketchPadConfig {
    /// 最大条目数，超出后按最近访问时间淘汰
    pub max_items: usize,
    /// 字符数超过该值的条目才自动生成摘要
    pub auto_summarize_threshold: usize,
    /// 送去摘要的前缀字符数
    pub summarize_prefix_chars: usize,
    /// 内容搜索扫描的值前缀字符数
    pub search_prefix_chars: usize,
    /// 单次摘要调用的超时
    pub summarize_timeout: Duration,
}

impl Default for SketchPadConfig {
    fn default() -> Self {
        Self {
            max_items: 1000,
            auto_summarize_threshold: 100,
            summarize_prefix_chars: 2000,
            search_prefix_chars: 500,
            summarize_timeout: Duration::from_secs(60),
        }
    }
}

impl SketchPadConfig {
    /// 设置最大条目数
    pub fn with_max_items(mut self, max: usize) -> Self {
        self.max_items = max;
        self
    }

    /// 设置自动摘要阈值
    pub fn with_auto_summarize_threshold(mut self, chars: usize) -> Self {
        self.auto_summarize_threshold = chars;
        self
    }

    /// 设置摘要超时
    pub fn with_summarize_timeout(mut self, timeout: Duration) -> Self {
        self.summarize_timeout = timeout;
        self
    }

    /// 校验配置
    pub fn validate(&self) -> StoreResult<()> {
        if self.max_items == 0 {
            return Err(StoreError::config("sketch pad max_items must be greater than 0"));
        }
        if self.summarize_timeout.is_zero() {
            return Err(StoreError::config("summarize timeout must be greater than 0"));
        }
        Ok(())
    }
}

/// SketchPad 的持久层快照格式
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SketchSnapshot {
    pub sketch_pad_id: String,
    /// 键 -> 条目；条目保持原始 JSON，逐个解析
    #[serde(default)]
    pub items: BTreeMap<String, Value>,
    #[serde(default = "Utc::now")]
    pub serialization_timestamp: DateTime<Utc>,
}

/// 当前使用的快速层
#[derive(Debug)]
enum TierBackend {
    /// 进程内共享的快速层
    Shared(Arc<dyn FastTier>),
    /// 共享层失败后切换到的私有内存层
    Degraded(MemoryTier),
}

impl TierBackend {
    fn tier(&self) -> &dyn FastTier {
        match self {
            TierBackend::Shared(tier) => tier.as_ref(),
            TierBackend::Degraded(tier) => tier,
        }
    }
}

/// 进程内的 LRU 记录，用于同一时刻多次访问时区分先后
#[derive(Debug, Default)]
struct Lru {
    order: HashMap<String, u64>,
    tick: u64,
}

impl Lru {
    fn touch(&mut self, key: &str) {
        self.tick += 1;
        self.order.insert(key.to_string(), self.tick);
    }

    fn forget(&mut self, key: &str) {
        self.order.remove(key);
    }

    fn rank(&self, key: &str) -> u64 {
        self.order.get(key).copied().unwrap_or(0)
    }

    fn clear(&mut self) {
        self.order.clear();
    }
}

#[derive(Debug)]
struct PadState {
    backend: TierBackend,
    lru: Lru,
}

/// Run a fast-tier operation against the current backend. If the backend
/// reports it is unavailable, degrade to a private tier and run it once more.
macro_rules! with_tier {
    ($pad:expr, $state:ident, |$tier:ident| $body:expr) => {{
        let first = {
            let $tier = $state.backend.tier();
            $body
        };
        match first {
            Err(StoreError::BackendUnavailable { message }) => {
                $pad.degrade(&mut *$state, &message).await;
                let $tier = $state.backend.tier();
                $body
            }
            other => other,
        }
    }};
}

/// SketchPad 存储
pub struct SketchPad {
    id: String,
    config: SketchPadConfig,
    file_path: PathBuf,
    ns: Namespace,
    clock: Arc<dyn Clock>,
    summarizer: Option<Arc<dyn Summarizer>>,
    state: Mutex<PadState>,
}

impl std::fmt::Debug for SketchPad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SketchPad")
            .field("id", &self.id)
            .field("file_path", &self.file_path)
            .field("max_items", &self.config.max_items)
            .finish()
    }
}

impl SketchPad {
    /// 创建 SketchPad，条目存放在给定的快速层中
    pub fn new(
        id: impl Into<String>,
        file_path: impl Into<PathBuf>,
        tier: Arc<dyn FastTier>,
        config: SketchPadConfig,
    ) -> Self {
        let id = id.into();
        Self {
            ns: Namespace::new(&id),
            id,
            config,
            file_path: file_path.into(),
            clock: Arc::new(SystemClock),
            summarizer: None,
            state: Mutex::new(PadState {
                backend: TierBackend::Shared(tier),
                lru: Lru::default(),
            }),
        }
    }

    /// 使用私有内存层和默认配置创建
    pub fn in_memory(id: impl Into<String>, file_path: impl Into<PathBuf>) -> Self {
        Self::new(id, file_path, Arc::new(MemoryTier::new()), SketchPadConfig::default())
    }

    /// 设置时钟
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 设置摘要器
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &SketchPadConfig {
        &self.config
    }

    /// 是否已降级为私有内存层
    pub async fn is_degraded(&self) -> bool {
        matches!(self.state.lock().await.backend, TierBackend::Degraded(_))
    }

    /// 检查当前快速层是否可用
    pub async fn health_check(&self) -> bool {
        let state = self.state.lock().await;
        state.backend.tier().ping().await.is_ok()
    }

    /// 未过期条目数
    pub async fn count(&self) -> usize {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = self.clock.now();
        let result = with_tier!(self, state, |tier| {
            self.live_items(tier, &mut state.lru, now).await.map(|items| items.len())
        });
        self.soft("count", result)
    }

    /// 显式更新标签，返回条目是否存在
    pub async fn set_tags(&self, key: &str, tags: BTreeSet<String>) -> StoreResult<bool> {
        validate_tags(&tags)?;
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = self.clock.now();
        let result = with_tier!(self, state, |tier| {
            self.retag_item(tier, &mut state.lru, key, &tags, now).await
        });
        Ok(self.soft("set_tags", result))
    }

    /// 清理所有已过期条目，返回清理数量
    pub async fn sweep_expired(&self) -> usize {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = self.clock.now();
        let result = with_tier!(self, state, |tier| {
            self.reclaim_expired(tier, &mut state.lru, now).await
        });
        let reclaimed = self.soft("sweep_expired", result);
        if reclaimed > 0 {
            debug!("SketchPad {} swept {} expired items", self.id, reclaimed);
        }
        reclaimed
    }

    /// 条目列表，按创建时间从新到旧
    pub async fn list_items(&self, include_value: bool) -> Vec<SketchListItem> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = self.clock.now();
        let result = with_tier!(self, state, |tier| {
            self.live_items(tier, &mut state.lru, now).await
        });
        let mut items: Vec<SketchListItem> = self
            .soft("list_items", result)
            .iter()
            .map(|(key, item)| SketchListItem::from_item(key, item, include_value))
            .collect();
        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.key.cmp(&b.key)));
        items
    }

    /// 统计信息
    pub async fn statistics(&self) -> SketchPadStatistics {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = self.clock.now();
        let result = with_tier!(self, state, |tier| {
            self.live_items(tier, &mut state.lru, now).await
        });
        let degraded = matches!(state.backend, TierBackend::Degraded(_));
        let items = self.soft("statistics", result);

        let total_items = items.len();
        let total_accesses: u64 = items.iter().map(|(_, item)| item.access_count).sum();

        let mut tag_counts: HashMap<&str, usize> = HashMap::new();
        let mut content_types: BTreeMap<String, usize> = BTreeMap::new();
        for (_, item) in &items {
            for tag in &item.tags {
                *tag_counts.entry(tag.as_str()).or_default() += 1;
            }
            *content_types.entry(item.content_type.to_string()).or_default() += 1;
        }
        let mut popular_tags: Vec<(String, usize)> = tag_counts
            .into_iter()
            .map(|(tag, count)| (tag.to_string(), count))
            .collect();
        popular_tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        popular_tags.truncate(POPULAR_TAG_LIMIT);

        SketchPadStatistics {
            total_items,
            max_items: self.config.max_items,
            items_with_summary: items.iter().filter(|(_, i)| i.summary.is_some()).count(),
            total_accesses,
            popular_tags,
            content_types,
            avg_access_per_item: if total_items == 0 {
                0.0
            } else {
                total_accesses as f64 / total_items as f64
            },
            memory_usage_percent: total_items as f64 / self.config.max_items as f64 * 100.0,
            degraded,
        }
    }

    /// 从共享层中移除本实例的全部数据（会话移出内存时使用）
    pub(crate) async fn release(&self) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let result = with_tier!(self, state, |tier| {
            self.purge_namespace(tier, &mut state.lru).await
        });
        self.soft("release", result);
    }

    // ---- 内部实现：调用方必须持有状态锁 ----

    fn soft<T: Default>(&self, op: &str, result: StoreResult<T>) -> T {
        match result {
            Ok(value) => value,
            Err(e) => {
                warn!("SketchPad {} {} failed: {}", self.id, op, e);
                T::default()
            }
        }
    }

    async fn degrade(&self, state: &mut PadState, reason: &str) {
        warn!(
            "SketchPad {}: fast tier unavailable ({}), falling back to memory-only mode",
            self.id, reason
        );
        state.backend = TierBackend::Degraded(MemoryTier::new());
        state.lru.clear();

        if let Some(snapshot) = durable::read_json::<SketchSnapshot>(&self.file_path).await {
            let now = self.clock.now();
            match self
                .load_snapshot(state.backend.tier(), &mut state.lru, snapshot, now)
                .await
            {
                Ok(count) => info!("SketchPad {} reseeded {} items from snapshot", self.id, count),
                Err(e) => warn!("SketchPad {} failed to reseed from snapshot: {}", self.id, e),
            }
        }
    }

    /// 读取原始条目；无法解析的条目会被删除
    async fn load(&self, tier: &dyn FastTier, key: &str) -> StoreResult<Option<SketchItem>> {
        let raw_key = self.ns.item(key);
        let Some(raw) = tier.get(&raw_key).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<SketchItem>(&raw) {
            Ok(item) => Ok(Some(item)),
            Err(e) => {
                warn!("SketchPad {}: dropping unreadable item '{}': {}", self.id, key, e);
                tier.delete(&[raw_key]).await?;
                Ok(None)
            }
        }
    }

    /// 读取未过期条目，过期条目顺便回收
    async fn load_live(
        &self,
        tier: &dyn FastTier,
        lru: &mut Lru,
        key: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SketchItem>> {
        match self.load(tier, key).await? {
            Some(item) if item.is_expired(now) => {
                self.remove_item(tier, lru, key, &item).await?;
                debug!("SketchPad {}: reclaimed expired item '{}'", self.id, key);
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// 写入条目并同步标签索引
    async fn store_item(
        &self,
        tier: &dyn FastTier,
        key: &str,
        item: &SketchItem,
        previous: Option<&SketchItem>,
    ) -> StoreResult<()> {
        tier.set(&self.ns.item(key), serde_json::to_string(item)?).await?;

        if let Some(previous) = previous {
            for tag in previous.tags.difference(&item.tags) {
                tier.set_remove(&self.ns.tag(tag), key).await?;
            }
        }
        for tag in &item.tags {
            tier.set_add(&self.ns.tag(tag), key).await?;
        }
        Ok(())
    }

    async fn remove_item(
        &self,
        tier: &dyn FastTier,
        lru: &mut Lru,
        key: &str,
        item: &SketchItem,
    ) -> StoreResult<()> {
        tier.delete(&[self.ns.item(key)]).await?;
        for tag in &item.tags {
            tier.set_remove(&self.ns.tag(tag), key).await?;
        }
        lru.forget(key);
        Ok(())
    }

    /// 所有未过期条目，按键排序
    async fn live_items(
        &self,
        tier: &dyn FastTier,
        lru: &mut Lru,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<(String, SketchItem)>> {
        let mut keys: Vec<String> = tier
            .scan_prefix(self.ns.items_prefix())
            .await?
            .iter()
            .filter_map(|raw| self.ns.item_key(raw).map(str::to_string))
            .collect();
        keys.sort();

        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(item) = self.load_live(tier, lru, &key, now).await? {
                items.push((key, item));
            }
        }
        Ok(items)
    }

    async fn reclaim_expired(
        &self,
        tier: &dyn FastTier,
        lru: &mut Lru,
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let keys = tier.scan_prefix(self.ns.items_prefix()).await?;
        let mut reclaimed = 0;
        for raw in &keys {
            let Some(key) = self.ns.item_key(raw) else {
                continue;
            };
            if let Some(item) = self.load(tier, key).await? {
                if item.is_expired(now) {
                    self.remove_item(tier, lru, key, &item).await?;
                    reclaimed += 1;
                }
            }
        }
        Ok(reclaimed)
    }

    /// 超出容量时淘汰最久未访问的条目
    async fn evict_over_capacity(
        &self,
        tier: &dyn FastTier,
        lru: &mut Lru,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<String>> {
        let items = self.live_items(tier, lru, now).await?;
        if items.len() <= self.config.max_items {
            return Ok(Vec::new());
        }

        let mut ranked: Vec<_> = items
            .into_iter()
            .map(|(key, item)| ((item.recency(), lru.rank(&key)), key, item))
            .collect();
        ranked.sort_by(|a, b| a.0.cmp(&b.0));

        let excess = ranked.len() - self.config.max_items;
        let mut evicted = Vec::with_capacity(excess);
        for (_, key, item) in ranked.into_iter().take(excess) {
            self.remove_item(tier, lru, &key, &item).await?;
            evicted.push(key);
        }
        debug!("SketchPad {} evicted {:?}", self.id, evicted);
        Ok(evicted)
    }

    async fn write_item(
        &self,
        tier: &dyn FastTier,
        lru: &mut Lru,
        request: &SetRequest,
        summary: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<String> {
        let expires_at = match request.ttl {
            Some(ttl) if !ttl.is_zero() => {
                let ttl = chrono::Duration::from_std(ttl)
                    .map_err(|_| StoreError::invalid_argument("ttl out of range"))?;
                Some(
                    now.checked_add_signed(ttl)
                        .ok_or_else(|| StoreError::invalid_argument("ttl out of range"))?,
                )
            }
            _ => None,
        };

        let hash = content_hash(&request.value);
        let key = match &request.key {
            None => self.generate_key(tier, lru, &request.value, now).await?,
            Some(requested) => match self.load_live(tier, lru, requested, now).await? {
                None => requested.clone(),
                Some(_) if request.overwrite => requested.clone(),
                Some(existing) if existing.content_hash == hash => {
                    debug!(
                        "SketchPad {}: '{}' already holds identical content, merging metadata",
                        self.id, requested
                    );
                    let mut merged = existing.clone();
                    merged.tags.extend(request.tags.iter().cloned());
                    if request.ttl.is_some() {
                        merged.expires_at = expires_at;
                    }
                    if summary.is_some() {
                        merged.summary = summary;
                    }
                    self.store_item(tier, requested, &merged, Some(&existing)).await?;
                    lru.touch(requested);
                    return Ok(requested.clone());
                }
                Some(_) => {
                    let suffixed = self.free_suffixed_key(tier, lru, requested, now).await?;
                    debug!(
                        "SketchPad {}: key '{}' taken, writing to '{}'",
                        self.id, requested, suffixed
                    );
                    suffixed
                }
            },
        };

        let previous = self.load(tier, &key).await?;
        let mut item = SketchItem::new(request.value.clone(), now);
        item.expires_at = expires_at;
        item.summary = summary;
        item.tags = request.tags.clone();

        self.store_item(tier, &key, &item, previous.as_ref()).await?;
        lru.touch(&key);
        self.evict_over_capacity(tier, lru, now).await?;
        Ok(key)
    }

    async fn generate_key(
        &self,
        tier: &dyn FastTier,
        lru: &mut Lru,
        value: &Value,
        now: DateTime<Utc>,
    ) -> StoreResult<String> {
        let slug = slugify(&stringify(value));
        for _ in 0..AUTO_KEY_ATTEMPTS {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            let key = format!("auto_{}_{}", slug, &suffix[..6]);
            if self.load_live(tier, lru, &key, now).await?.is_none() {
                return Ok(key);
            }
        }
        Ok(format!("auto_{}_{}", slug, uuid::Uuid::new_v4().simple()))
    }

    async fn free_suffixed_key(
        &self,
        tier: &dyn FastTier,
        lru: &mut Lru,
        key: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<String> {
        let mut n: u64 = 1;
        loop {
            let candidate = format!("{}_{}", key, n);
            if self.load_live(tier, lru, &candidate, now).await?.is_none() {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    async fn read_item(
        &self,
        tier: &dyn FastTier,
        lru: &mut Lru,
        key: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SketchItem>> {
        let Some(mut item) = self.load_live(tier, lru, key, now).await? else {
            return Ok(None);
        };
        item.record_access(now);
        tier.set(&self.ns.item(key), serde_json::to_string(&item)?).await?;
        lru.touch(key);
        Ok(Some(item))
    }

    async fn retag_item(
        &self,
        tier: &dyn FastTier,
        lru: &mut Lru,
        key: &str,
        tags: &BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let Some(previous) = self.load_live(tier, lru, key, now).await? else {
            return Ok(false);
        };
        let mut item = previous.clone();
        item.tags = tags.clone();
        self.store_item(tier, key, &item, Some(&previous)).await?;
        Ok(true)
    }

    async fn find_by_tags(
        &self,
        tier: &dyn FastTier,
        lru: &mut Lru,
        tags: &BTreeSet<String>,
        match_all: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<(String, SketchItem)>> {
        let mut candidates: Option<BTreeSet<String>> = None;
        for tag in tags {
            let members = tier.set_members(&self.ns.tag(tag)).await?;
            candidates = Some(match candidates {
                None => members,
                Some(acc) if match_all => acc.intersection(&members).cloned().collect(),
                Some(acc) => acc.union(&members).cloned().collect(),
            });
        }

        let mut results = Vec::new();
        for key in candidates.unwrap_or_default() {
            let Some(item) = self.load_live(tier, lru, &key, now).await? else {
                continue;
            };
            let matched = if match_all {
                tags.is_subset(&item.tags)
            } else {
                !tags.is_disjoint(&item.tags)
            };
            if matched {
                results.push((key, item));
            }
        }
        Ok(results)
    }

    async fn remove_key(
        &self,
        tier: &dyn FastTier,
        lru: &mut Lru,
        key: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let Some(item) = self.load(tier, key).await? else {
            return Ok(false);
        };
        self.remove_item(tier, lru, key, &item).await?;
        Ok(!item.is_expired(now))
    }

    async fn purge_namespace(&self, tier: &dyn FastTier, lru: &mut Lru) -> StoreResult<usize> {
        let raw_keys = tier.scan_prefix(self.ns.root()).await?;
        let item_count = raw_keys
            .iter()
            .filter(|raw| self.ns.item_key(raw).is_some())
            .count();
        tier.delete(&raw_keys).await?;
        lru.clear();
        Ok(item_count)
    }

    /// 用快照替换全部条目，返回保留下来的条目数
    async fn load_snapshot(
        &self,
        tier: &dyn FastTier,
        lru: &mut Lru,
        snapshot: SketchSnapshot,
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        if snapshot.sketch_pad_id != self.id {
            warn!(
                "SketchPad {}: loading snapshot written by '{}'",
                self.id, snapshot.sketch_pad_id
            );
        }

        self.purge_namespace(tier, lru).await?;

        let mut loaded = Vec::with_capacity(snapshot.items.len());
        for (key, raw) in snapshot.items {
            if key.is_empty() {
                warn!("SketchPad {}: skipping item with empty key", self.id);
                continue;
            }
            let item = match serde_json::from_value::<SketchItem>(raw) {
                Ok(item) if item.is_well_formed() => item,
                Ok(_) => {
                    warn!("SketchPad {}: skipping malformed item '{}'", self.id, key);
                    continue;
                }
                Err(e) => {
                    warn!("SketchPad {}: skipping unreadable item '{}': {}", self.id, key, e);
                    continue;
                }
            };
            if item.is_expired(now) {
                continue;
            }
            self.store_item(tier, &key, &item, None).await?;
            loaded.push((item.recency(), key));
        }

        loaded.sort();
        for (_, key) in &loaded {
            lru.touch(key);
        }

        let evicted = self.evict_over_capacity(tier, lru, now).await?;
        Ok(loaded.len() - evicted.len())
    }
}

#[async_trait]
impl KeyValueStore for SketchPad {
    async fn set(&self, request: SetRequest) -> StoreResult<String> {
        if let Some(key) = &request.key {
            validate_key(key)?;
        }
        validate_tags(&request.tags)?;

        // 摘要在锁外生成，且有超时
        let summary = match &request.summary {
            Some(summary) => Some(summary.clone()),
            None if request.auto_summarize => self.auto_summary(&stringify(&request.value)).await,
            None => None,
        };

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = self.clock.now();
        let key = with_tier!(self, state, |tier| {
            self.write_item(tier, &mut state.lru, &request, summary.clone(), now)
                .await
        })?;
        debug!("SketchPad {}: stored '{}'", self.id, key);
        Ok(key)
    }

    async fn get(&self, key: &str) -> Option<SketchItem> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = self.clock.now();
        let result = with_tier!(self, state, |tier| {
            self.read_item(tier, &mut state.lru, key, now).await
        });
        self.soft("get", result)
    }

    async fn search_by_tags(
        &self,
        tags: &BTreeSet<String>,
        match_all: bool,
    ) -> Vec<(String, SketchItem)> {
        if tags.is_empty() {
            return Vec::new();
        }
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = self.clock.now();
        let result = with_tier!(self, state, |tier| {
            self.find_by_tags(tier, &mut state.lru, tags, match_all, now)
                .await
        });
        self.soft("search_by_tags", result)
    }

    async fn search_by_content(&self, query: &str, limit: usize) -> Vec<(String, SketchItem)> {
        let query = query.trim().to_lowercase();
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = self.clock.now();
        let result = with_tier!(self, state, |tier| {
            self.live_items(tier, &mut state.lru, now).await
        });

        let prefix_chars = self.config.search_prefix_chars;
        let mut matches: Vec<(String, SketchItem)> = self
            .soft("search_by_content", result)
            .into_iter()
            .filter(|(key, item)| item.matches_query(key, &query, prefix_chars))
            .collect();
        matches.sort_by(|(ka, a), (kb, b)| {
            b.access_count
                .cmp(&a.access_count)
                .then_with(|| b.recency().cmp(&a.recency()))
                .then_with(|| ka.cmp(kb))
        });
        matches.truncate(limit);
        matches
    }

    async fn delete(&self, key: &str) -> bool {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = self.clock.now();
        let result = with_tier!(self, state, |tier| {
            self.remove_key(tier, &mut state.lru, key, now).await
        });
        self.soft("delete", result)
    }

    async fn exists(&self, key: &str) -> bool {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = self.clock.now();
        let result = with_tier!(self, state, |tier| {
            self.load_live(tier, &mut state.lru, key, now)
                .await
                .map(|item| item.is_some())
        });
        self.soft("exists", result)
    }

    async fn keys(&self, pattern: Option<&str>) -> Vec<String> {
        let matcher = match pattern.map(glob_to_regex) {
            None => None,
            Some(Ok(re)) => Some(re),
            Some(Err(e)) => {
                warn!("SketchPad {}: invalid key pattern: {}", self.id, e);
                return Vec::new();
            }
        };

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = self.clock.now();
        let result = with_tier!(self, state, |tier| {
            self.live_items(tier, &mut state.lru, now).await
        });
        self.soft("keys", result)
            .into_iter()
            .map(|(key, _)| key)
            .filter(|key| matcher.as_ref().map(|re| re.is_match(key)).unwrap_or(true))
            .collect()
    }

    async fn clear(&self) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let result = with_tier!(self, state, |tier| {
            self.purge_namespace(tier, &mut state.lru).await
        });
        let removed = self.soft("clear", result);
        info!("SketchPad {} cleared {} items", self.id, removed);
    }
}

#[async_trait]
impl Snapshot for SketchPad {
    type Data = SketchSnapshot;

    async fn serialize(&self) -> SketchSnapshot {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = self.clock.now();
        let result = with_tier!(self, state, |tier| {
            self.live_items(tier, &mut state.lru, now).await
        });
        self.build_snapshot(self.soft("serialize", result), now)
    }

    async fn deserialize(&self, data: SketchSnapshot) -> usize {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = self.clock.now();
        let result = with_tier!(self, state, |tier| {
            self.load_snapshot(tier, &mut state.lru, data.clone(), now)
                .await
        });
        self.soft("deserialize", result)
    }

    async fn persist(&self) -> bool {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = self.clock.now();
        let result = with_tier!(self, state, |tier| {
            self.live_items(tier, &mut state.lru, now).await
        });
        let items = match result {
            Ok(items) => items,
            Err(e) => {
                warn!("SketchPad {} persist failed: {}", self.id, e);
                return false;
            }
        };
        let snapshot = self.build_snapshot(items, now);

        match durable::write_json_atomic(&self.file_path, &snapshot).await {
            Ok(()) => {
                debug!(
                    "SketchPad {} persisted {} items to {:?}",
                    self.id,
                    snapshot.items.len(),
                    self.file_path
                );
                true
            }
            Err(e) => {
                warn!("SketchPad {} persist to {:?} failed: {}", self.id, self.file_path, e);
                false
            }
        }
    }

    async fn restore(&self) -> bool {
        let Some(snapshot) = durable::read_json::<SketchSnapshot>(&self.file_path).await else {
            return false;
        };
        let count = self.deserialize(snapshot).await;
        info!("SketchPad {} restored {} items", self.id, count);
        true
    }

    fn file_path(&self) -> &Path {
        &self.file_path
    }
}

impl SketchPad {
    fn build_snapshot(&self, items: Vec<(String, SketchItem)>, now: DateTime<Utc>) -> SketchSnapshot {
        let mut out = BTreeMap::new();
        for (key, item) in items {
            match serde_json::to_value(&item) {
                Ok(value) => {
                    out.insert(key, value);
                }
                Err(e) => warn!("SketchPad {}: cannot serialize '{}': {}", self.id, key, e),
            }
        }
        SketchSnapshot {
            sketch_pad_id: self.id.clone(),
            items: out,
            serialization_timestamp: now,
        }
    }

    async fn auto_summary(&self, text: &str) -> Option<String> {
        if text.chars().count() <= self.config.auto_summarize_threshold {
            return None;
        }
        let summarizer = self.summarizer.as_ref()?;
        let prefix = char_prefix(text, self.config.summarize_prefix_chars);

        match tokio::time::timeout(self.config.summarize_timeout, summarizer.summarize(prefix)).await
        {
            Ok(Ok(summary)) if !summary.trim().is_empty() => Some(summary.trim().to_string()),
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                warn!("SketchPad {}: summarization failed: {}", self.id, e);
                None
            }
            Err(_) => {
                warn!(
                    "SketchPad {}: summarization timed out after {:?}",
                    self.id, self.config.summarize_timeout
                );
                None
            }
        }
    }
}

fn validate_key(key: &str) -> StoreResult<()> {
    if key.trim().is_empty() {
        return Err(StoreError::invalid_argument("key must not be empty"));
    }
    if key.chars().any(char::is_control) {
        return Err(StoreError::invalid_argument(format!(
            "key contains control characters: {:?}",
            key
        )));
    }
    Ok(())
}

fn validate_tags(tags: &BTreeSet<String>) -> StoreResult<()> {
    if tags.iter().any(|t| t.trim().is_empty()) {
        return Err(StoreError::invalid_argument("tags must not be empty"));
    }
    Ok(())
}

/// 取值开头的字符生成键的可读部分
fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for c in text.chars().take(40) {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') && !slug.is_empty() {
            slug.push('_');
        }
        if slug.len() >= 20 {
            break;
        }
    }
    let slug = slug.trim_end_matches('_');
    if slug.is_empty() {
        "item".to_string()
    } else {
        slug.to_string()
    }
}

/// `*` 匹配任意串，`?` 匹配单个字符，其余字符按字面匹配
fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut re = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re)
}
