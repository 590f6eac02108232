//! # Session Manager
//!
//! 管理会话的生命周期：创建、查找、持久化、空闲清理。
//!
//! - 每个会话 id 在内存中最多只有一个实例，保证同一份持久化文件只有一个写入者
//! - 查找时优先读内存，未命中时从持久层恢复（两个存储都恢复成功才算命中）
//! - 达到最大活跃会话数时，先持久化并移出最久未访问的空闲会话
//! - 后台任务负责自动保存、空闲清理和 TTL 清扫

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use quill_core::{Clock, Summarizer, SystemClock};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::durable;
use crate::error::{StoreError, StoreResult};
use crate::history::{History, HistoryConfig, HistorySnapshot};
use crate::session::Session;
use crate::sketch_pad::{SketchPad, SketchPadConfig, SketchSnapshot};
use crate::store::Snapshot;
use crate::tier::{FastTier, MemoryTier};

/// 会话 id 的最大长度
pub const MAX_SESSION_ID_LEN: usize = 128;

/// SessionManager 配置
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// SketchPad 快照目录
    pub sketch_dir: PathBuf,
    /// History 快照目录
    pub context_dir: PathBuf,
    /// 会话标记文件目录
    pub conversation_dir: PathBuf,
    pub sketch_pad: SketchPadConfig,
    pub history: HistoryConfig,
    /// 空闲超过该时长的会话由后台任务移出内存
    pub idle_timeout_secs: u64,
    /// 最大活跃会话数
    pub max_active_sessions: usize,
    /// 自动保存间隔
    pub auto_save_interval_secs: u64,
    /// 空闲清理间隔
    pub cleanup_interval_secs: u64,
    /// TTL 清扫间隔
    pub sweep_interval_secs: u64,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self::with_base_dir(crate::default_data_dir())
    }
}

impl SessionManagerConfig {
    /// 三类文件都放在 `base` 下的子目录中
    pub fn with_base_dir(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            sketch_dir: base.join("sketches"),
            context_dir: base.join("contexts"),
            conversation_dir: base.join("conversations"),
            sketch_pad: SketchPadConfig::default(),
            history: HistoryConfig::default(),
            idle_timeout_secs: 3600,  // 1小时空闲超时
            max_active_sessions: 100,
            auto_save_interval_secs: 60,
            cleanup_interval_secs: 300,
            sweep_interval_secs: 60,
        }
    }

    /// 设置空闲超时
    pub fn with_idle_timeout(mut self, secs: u64) -> Self {
        self.idle_timeout_secs = secs;
        self
    }

    /// 设置最大活跃会话数
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_active_sessions = max;
        self
    }

    /// 设置 SketchPad 配置
    pub fn with_sketch_pad_config(mut self, config: SketchPadConfig) -> Self {
        self.sketch_pad = config;
        self
    }

    /// 设置 History 配置
    pub fn with_history_config(mut self, config: HistoryConfig) -> Self {
        self.history = config;
        self
    }

    /// 校验配置
    pub fn validate(&self) -> StoreResult<()> {
        self.sketch_pad.validate()?;
        self.history.validate()?;
        if self.max_active_sessions == 0 {
            return Err(StoreError::config("max_active_sessions must be greater than 0"));
        }
        for (name, secs) in [
            ("auto_save_interval_secs", self.auto_save_interval_secs),
            ("cleanup_interval_secs", self.cleanup_interval_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
        ] {
            if secs == 0 {
                return Err(StoreError::config(format!("{} must be greater than 0", name)));
            }
        }
        Ok(())
    }
}

/// 会话标记文件内容
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionMarker {
    session_id: String,
    created_at: DateTime<Utc>,
}

/// 会话概览
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    /// 是否在内存中
    pub active: bool,
    pub last_accessed: Option<DateTime<Utc>>,
    pub sketch_items: usize,
    pub messages: usize,
}

/// 会话 id 只允许字母、数字、`_` 和 `-`
pub fn validate_session_id(id: &str) -> StoreResult<()> {
    let valid = !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::invalid_argument(format!(
            "invalid session id '{}': expected 1-{} characters of [A-Za-z0-9_-]",
            id, MAX_SESSION_ID_LEN
        )))
    }
}

fn expand_dir(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}

/// SessionManager
///
/// 所有会话共享同一个快速层，键按会话 id 划分命名空间。
pub struct SessionManager {
    config: SessionManagerConfig,
    tier: Arc<dyn FastTier>,
    summarizer: Option<Arc<dyn Summarizer>>,
    clock: Arc<dyn Clock>,
    /// 内存中的活跃会话
    sessions: DashMap<String, Arc<Session>>,
    /// 创建/恢复会话时串行化，避免同一 id 出现两个实例
    admission: Mutex<()>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("tier", &self.tier.name())
            .field("active_sessions", &self.sessions.len())
            .finish()
    }
}

impl SessionManager {
    /// 创建 SessionManager 并确保数据目录存在
    pub async fn new(mut config: SessionManagerConfig) -> StoreResult<Self> {
        config.validate()?;

        config.sketch_dir = expand_dir(&config.sketch_dir);
        config.context_dir = expand_dir(&config.context_dir);
        config.conversation_dir = expand_dir(&config.conversation_dir);
        for dir in [&config.sketch_dir, &config.context_dir, &config.conversation_dir] {
            tokio::fs::create_dir_all(dir).await?;
        }

        info!(
            "SessionManager initialized (sketches: {:?}, contexts: {:?})",
            config.sketch_dir, config.context_dir
        );

        Ok(Self {
            config,
            tier: Arc::new(MemoryTier::new()),
            summarizer: None,
            clock: Arc::new(SystemClock),
            sessions: DashMap::new(),
            admission: Mutex::new(()),
        })
    }

    /// 设置共享快速层
    pub fn with_tier(mut self, tier: Arc<dyn FastTier>) -> Self {
        self.tier = tier;
        self
    }

    /// 设置摘要器
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// 设置时钟
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SessionManagerConfig {
        &self.config
    }

    pub fn sketch_path(&self, id: &str) -> PathBuf {
        self.config.sketch_dir.join(format!("skt_{}.json", id))
    }

    pub fn context_path(&self, id: &str) -> PathBuf {
        self.config.context_dir.join(format!("ctx_{}.json", id))
    }

    pub fn marker_path(&self, id: &str) -> PathBuf {
        self.config.conversation_dir.join(format!("conv_{}.marker", id))
    }

    /// 创建会话；id 已在内存中时直接返回已有实例
    pub async fn create_session(&self, id: Option<&str>) -> StoreResult<Arc<Session>> {
        let id = match id {
            Some(id) => {
                validate_session_id(id)?;
                id.to_string()
            }
            None => uuid::Uuid::new_v4().to_string(),
        };

        let _admission = self.admission.lock().await;

        if let Some(existing) = self.active(&id) {
            debug!("Session {} already active", id);
            return Ok(existing);
        }

        self.make_room().await;

        let session = match self.rehydrate(&id).await {
            Some(session) => {
                info!("Resumed persisted session: {}", id);
                session
            }
            None => {
                let session = Arc::new(Session::new(
                    &id,
                    self.new_sketch_pad(&id),
                    self.new_history(&id),
                    Arc::clone(&self.clock),
                ));
                if !session.sketch_pad().persist().await || !session.history().persist().await {
                    warn!("Session {} created without an initial snapshot", id);
                }
                info!("Created session: {}", id);
                session
            }
        };

        self.write_marker(&id, session.created_at()).await;
        self.sessions.insert(id, Arc::clone(&session));
        Ok(session)
    }

    /// 获取会话：优先内存，未命中时从持久层恢复
    pub async fn get_session(&self, id: &str) -> StoreResult<Option<Arc<Session>>> {
        validate_session_id(id)?;

        if let Some(session) = self.active(id) {
            return Ok(Some(session));
        }

        let _admission = self.admission.lock().await;
        if let Some(session) = self.active(id) {
            return Ok(Some(session));
        }

        match self.rehydrate(id).await {
            Some(session) => {
                self.make_room().await;
                self.sessions.insert(id.to_string(), Arc::clone(&session));
                debug!("Loaded session from storage: {}", id);
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// 获取或创建会话
    pub async fn get_or_create_session(&self, id: &str) -> StoreResult<Arc<Session>> {
        match self.get_session(id).await? {
            Some(session) => Ok(session),
            None => self.create_session(Some(id)).await,
        }
    }

    /// 删除会话：内存实例、快速层数据、快照和标记文件
    pub async fn delete_session(&self, id: &str) -> StoreResult<bool> {
        validate_session_id(id)?;
        let _admission = self.admission.lock().await;

        let mut existed = false;
        if let Some((_, session)) = self.sessions.remove(id) {
            session.sketch_pad().release().await;
            existed = true;
        }

        for path in [self.sketch_path(id), self.context_path(id), self.marker_path(id)] {
            existed |= durable::remove_if_exists(&path).await?;
        }

        if existed {
            info!("Deleted session: {}", id);
        }
        Ok(existed)
    }

    /// 列出所有创建过的会话（按标记文件）
    pub async fn list_sessions(&self) -> StoreResult<Vec<SessionInfo>> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.config.conversation_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(id) = name
                .strip_prefix("conv_")
                .and_then(|rest| rest.strip_suffix(".marker"))
            {
                if validate_session_id(id).is_ok() {
                    ids.push(id.to_string());
                }
            }
        }

        let mut infos = Vec::with_capacity(ids.len());
        for id in ids {
            infos.push(self.session_info(&id).await);
        }
        infos.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(infos)
    }

    async fn session_info(&self, id: &str) -> SessionInfo {
        if let Some(session) = self.active(id) {
            return SessionInfo {
                id: id.to_string(),
                created_at: Some(session.created_at()),
                active: true,
                last_accessed: Some(session.last_accessed()),
                sketch_items: session.sketch_pad().count().await,
                messages: session.history().message_count().await,
            };
        }

        let marker = durable::read_json::<SessionMarker>(&self.marker_path(id)).await;
        let sketch = durable::read_json::<SketchSnapshot>(&self.sketch_path(id)).await;
        let history = durable::read_json::<HistorySnapshot>(&self.context_path(id)).await;
        SessionInfo {
            id: id.to_string(),
            created_at: marker.map(|m| m.created_at),
            active: false,
            last_accessed: None,
            sketch_items: sketch.map(|s| s.items.len()).unwrap_or(0),
            messages: history.map(|h| h.history.len()).unwrap_or(0),
        }
    }

    /// 持久化一个活跃会话，两个存储都写入成功时返回 true
    pub async fn save_session(&self, id: &str) -> bool {
        match self.active(id) {
            Some(session) => persist_pair(&session).await,
            None => false,
        }
    }

    /// 持久化所有活跃会话，返回成功数量
    pub async fn save_all(&self) -> usize {
        let mut saved = 0;
        for session in self.snapshot_sessions() {
            if persist_pair(&session).await {
                saved += 1;
            }
        }
        debug!("Saved {} sessions", saved);
        saved
    }

    /// 持久化并移出空闲超过 `max_idle` 的会话，返回移出数量
    ///
    /// 正在被使用（有外部引用）的会话不会被移出。
    pub async fn cleanup_inactive(&self, max_idle: Duration) -> usize {
        let max_idle = chrono::Duration::from_std(max_idle)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 1000));
        let idle: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_for() > max_idle)
            .map(|entry| entry.key().clone())
            .collect();

        // 与创建/恢复互斥，避免在快照写完前从旧文件恢复
        let _admission = self.admission.lock().await;
        let mut evicted = 0;
        for id in idle {
            if self.evict(&id).await {
                evicted += 1;
            }
        }
        if evicted > 0 {
            info!("Evicted {} idle sessions from memory", evicted);
        }
        evicted
    }

    /// 清扫所有活跃会话中已过期的条目
    pub async fn sweep_expired(&self) -> usize {
        let mut reclaimed = 0;
        for session in self.snapshot_sessions() {
            reclaimed += session.sketch_pad().sweep_expired().await;
        }
        reclaimed
    }

    /// 会话是否创建过（活跃或有标记文件）
    pub async fn session_exists(&self, id: &str) -> bool {
        if validate_session_id(id).is_err() {
            return false;
        }
        self.sessions.contains_key(id)
            || tokio::fs::try_exists(self.marker_path(id))
                .await
                .unwrap_or(false)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// 启动后台维护任务；SessionManager 被释放后任务自动退出
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let save_every = Duration::from_secs(self.config.auto_save_interval_secs);
        let cleanup_every = Duration::from_secs(self.config.cleanup_interval_secs);
        let sweep_every = Duration::from_secs(self.config.sweep_interval_secs);
        let idle_timeout = Duration::from_secs(self.config.idle_timeout_secs);

        tokio::spawn(async move {
            let mut save_interval = interval_at(Instant::now() + save_every, save_every);
            let mut cleanup_interval = interval_at(Instant::now() + cleanup_every, cleanup_every);
            let mut sweep_interval = interval_at(Instant::now() + sweep_every, sweep_every);
            for interval in [&mut save_interval, &mut cleanup_interval, &mut sweep_interval] {
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            }

            loop {
                tokio::select! {
                    _ = save_interval.tick() => {
                        let Some(manager) = weak.upgrade() else { break };
                        manager.save_all().await;
                    }
                    _ = cleanup_interval.tick() => {
                        let Some(manager) = weak.upgrade() else { break };
                        manager.cleanup_inactive(idle_timeout).await;
                    }
                    _ = sweep_interval.tick() => {
                        let Some(manager) = weak.upgrade() else { break };
                        let reclaimed = manager.sweep_expired().await;
                        if reclaimed > 0 {
                            debug!("Swept {} expired sketch items", reclaimed);
                        }
                    }
                }
            }
            debug!("Session maintenance stopped");
        })
    }

    /// 关闭前持久化所有会话
    pub async fn shutdown(&self) -> usize {
        let saved = self.save_all().await;
        info!("SessionManager shutdown: saved {} sessions", saved);
        saved
    }

    fn active(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| {
            entry.value().touch();
            Arc::clone(entry.value())
        })
    }

    fn snapshot_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn new_sketch_pad(&self, id: &str) -> SketchPad {
        let pad = SketchPad::new(
            id,
            self.sketch_path(id),
            Arc::clone(&self.tier),
            self.config.sketch_pad.clone(),
        )
        .with_clock(Arc::clone(&self.clock));
        match &self.summarizer {
            Some(summarizer) => pad.with_summarizer(Arc::clone(summarizer)),
            None => pad,
        }
    }

    fn new_history(&self, id: &str) -> History {
        let history = History::new(id, self.context_path(id), self.config.history.clone())
            .with_clock(Arc::clone(&self.clock));
        match &self.summarizer {
            Some(summarizer) => history.with_summarizer(Arc::clone(summarizer)),
            None => history,
        }
    }

    /// 从持久层恢复一对存储；只恢复成功一半时视为不存在
    async fn rehydrate(&self, id: &str) -> Option<Arc<Session>> {
        let pad = self.new_sketch_pad(id);
        let history = self.new_history(id);

        let pad_ok = pad.restore().await;
        let history_ok = pad_ok && history.restore().await;
        if !history_ok {
            if pad_ok {
                warn!("Session {}: context snapshot missing or unreadable, not resuming", id);
            }
            pad.release().await;
            return None;
        }

        let mut session = Session::new(id, pad, history, Arc::clone(&self.clock));
        if let Some(marker) = durable::read_json::<SessionMarker>(&self.marker_path(id)).await {
            session = session.with_created_at(marker.created_at);
        }
        Some(Arc::new(session))
    }

    /// 达到上限时移出最久未访问的空闲会话
    async fn make_room(&self) {
        let mut unsaved: HashSet<String> = HashSet::new();
        while self.sessions.len() >= self.config.max_active_sessions {
            let candidate = self
                .sessions
                .iter()
                .filter(|entry| Arc::strong_count(entry.value()) == 1)
                .filter(|entry| !unsaved.contains(entry.key()))
                .min_by_key(|entry| entry.value().last_accessed())
                .map(|entry| entry.key().clone());

            let Some(id) = candidate else {
                warn!(
                    "All {} active sessions are in use or unsaved, admitting over capacity",
                    self.sessions.len()
                );
                return;
            };
            if self.evict(&id).await {
                debug!("Evicted session {} to make room", id);
            } else {
                unsaved.insert(id);
            }
        }
    }

    /// 持久化并移出一个没有外部引用的会话
    ///
    /// 快照写入失败时会话放回内存，调用方需持有 `admission`。
    async fn evict(&self, id: &str) -> bool {
        let Some((_, session)) = self
            .sessions
            .remove_if(id, |_, session| Arc::strong_count(session) == 1)
        else {
            return false;
        };
        if !persist_pair(&session).await {
            warn!("Session {} could not be saved, keeping it in memory", id);
            self.sessions.insert(id.to_string(), session);
            return false;
        }
        session.sketch_pad().release().await;
        debug!("Evicted session from memory: {}", id);
        true
    }

    /// 标记文件只在首次创建时写入
    async fn write_marker(&self, id: &str, created_at: DateTime<Utc>) {
        let path = self.marker_path(id);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return;
        }
        let marker = SessionMarker {
            session_id: id.to_string(),
            created_at,
        };
        if let Err(e) = durable::write_json_atomic(&path, &marker).await {
            warn!("Failed to write marker for session {}: {}", id, e);
        }
    }
}

async fn persist_pair(session: &Session) -> bool {
    let pad_ok = session.sketch_pad().persist().await;
    let history_ok = session.history().persist().await;
    pad_ok && history_ok
}
