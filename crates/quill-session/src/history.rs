//! # History
//!
//! 会话的对话历史：按追加顺序保存消息，超过上限时调用摘要器压缩，
//! 用一条助手消息承接之前的上下文。
//!
//! 持久层是单个 JSON 文件：
//! `{ "history": [...], "conversation_summary": "...", "session_metadata": {...} }`

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quill_core::{Clock, Message, Role, Summarizer, SystemClock, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::durable;
use crate::error::{StoreError, StoreResult};
use crate::store::Snapshot;

/// History 配置
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// 超过该条数时压缩
    pub max_history_length: usize,
    /// 单次摘要调用的超时
    pub summarize_timeout: Duration,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_history_length: 10,
            summarize_timeout: Duration::from_secs(60),
        }
    }
}

impl HistoryConfig {
    /// 设置消息上限
    pub fn with_max_history_length(mut self, max: usize) -> Self {
        self.max_history_length = max;
        self
    }

    /// 设置摘要超时
    pub fn with_summarize_timeout(mut self, timeout: Duration) -> Self {
        self.summarize_timeout = timeout;
        self
    }

    /// 校验配置
    pub fn validate(&self) -> StoreResult<()> {
        if self.max_history_length == 0 {
            return Err(StoreError::config("max_history_length must be greater than 0"));
        }
        if self.summarize_timeout.is_zero() {
            return Err(StoreError::config("summarize timeout must be greater than 0"));
        }
        Ok(())
    }
}

/// 历史元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMetadata {
    pub context_id: String,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// 累计写入的消息数，压缩后不清零
    #[serde(default)]
    pub total_messages: u64,
    #[serde(default)]
    pub max_history_length: usize,
    #[serde(default)]
    pub compactions: u64,
    /// 已发起的工具调用 id，只在快照中出现，恢复后迟到的工具结果仍能匹配
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tool_call_ids: BTreeSet<String>,
    /// 调用方自定义字段
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

const RESERVED_METADATA_KEYS: &[&str] = &[
    "context_id",
    "start_time",
    "last_activity",
    "total_messages",
    "max_history_length",
    "compactions",
    "tool_call_ids",
];

impl HistoryMetadata {
    fn new(context_id: &str, max_history_length: usize, now: DateTime<Utc>) -> Self {
        Self {
            context_id: context_id.to_string(),
            start_time: now,
            last_activity: now,
            total_messages: 0,
            max_history_length,
            compactions: 0,
            tool_call_ids: BTreeSet::new(),
            extra: BTreeMap::new(),
        }
    }
}

/// 持久层快照格式
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySnapshot {
    /// 消息保持原始 JSON，逐条解析
    #[serde(default)]
    pub history: Vec<Value>,
    #[serde(default)]
    pub conversation_summary: String,
    #[serde(default)]
    pub session_metadata: Value,
}

#[derive(Debug)]
struct HistoryState {
    messages: Vec<Message>,
    summary: String,
    metadata: HistoryMetadata,
    /// 已发起过的工具调用 id，压缩后仍保留
    known_tool_calls: HashSet<String>,
    /// 外部消息列表中已记录的长度
    external_cursor: usize,
}

impl HistoryState {
    fn check_tool_reference(&self, message: &Message, pending: &HashSet<String>) -> StoreResult<()> {
        if message.role != Role::Tool {
            return Ok(());
        }
        let call_id = message.tool_call_id.as_deref().unwrap_or_default();
        if self.known_tool_calls.contains(call_id) || pending.contains(call_id) {
            Ok(())
        } else {
            Err(ValidationError::UnknownToolCallId(call_id.to_string()).into())
        }
    }

    fn push(&mut self, mut message: Message, now: DateTime<Utc>) {
        if message.timestamp.is_none() {
            message.timestamp = Some(now);
        }
        self.known_tool_calls
            .extend(message.tool_call_ids().map(str::to_string));
        self.messages.push(message);
        self.metadata.total_messages += 1;
        self.metadata.last_activity = now;
    }
}

/// 对话历史存储
pub struct History {
    id: String,
    config: HistoryConfig,
    file_path: PathBuf,
    clock: Arc<dyn Clock>,
    summarizer: Option<Arc<dyn Summarizer>>,
    state: Mutex<HistoryState>,
}

impl std::fmt::Debug for History {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("History")
            .field("id", &self.id)
            .field("file_path", &self.file_path)
            .field("max_history_length", &self.config.max_history_length)
            .finish()
    }
}

impl History {
    /// 创建空历史
    pub fn new(id: impl Into<String>, file_path: impl Into<PathBuf>, config: HistoryConfig) -> Self {
        let id = id.into();
        let now = Utc::now();
        let metadata = HistoryMetadata::new(&id, config.max_history_length, now);
        Self {
            id,
            config,
            file_path: file_path.into(),
            clock: Arc::new(SystemClock),
            summarizer: None,
            state: Mutex::new(HistoryState {
                messages: Vec::new(),
                summary: String::new(),
                metadata,
                known_tool_calls: HashSet::new(),
                external_cursor: 0,
            }),
        }
    }

    /// 设置时钟；元数据的起始时间同步到该时钟
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let state = self.state.get_mut();
        state.metadata.start_time = now;
        state.metadata.last_activity = now;
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

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// 追加一条消息；不合法的消息被拒绝，历史保持不变
    pub async fn store_message(&self, message: Message) -> StoreResult<()> {
        message.validate()?;

        let mut state = self.state.lock().await;
        state.check_tool_reference(&message, &HashSet::new())?;

        let now = self.clock.now();
        state.push(message, now);
        self.compact_if_needed(&mut state).await;
        Ok(())
    }

    /// 与外部消息列表同步，只追加尚未记录的尾部，返回追加条数
    pub async fn sync_with_external(&self, external: &[Message]) -> StoreResult<usize> {
        let mut state = self.state.lock().await;

        if external.len() < state.external_cursor {
            warn!(
                "History {}: external list shrank from {} to {}, resetting cursor",
                self.id,
                state.external_cursor,
                external.len()
            );
            state.external_cursor = external.len();
            return Ok(0);
        }

        let delta = &external[state.external_cursor..];
        if delta.is_empty() {
            return Ok(0);
        }

        let mut pending = HashSet::new();
        for message in delta {
            message.validate()?;
            state.check_tool_reference(message, &pending)?;
            pending.extend(message.tool_call_ids().map(str::to_string));
        }

        let now = self.clock.now();
        for message in delta {
            let mut message = message.clone();
            message.timestamp = Some(now);
            state.push(message, now);
            self.compact_if_needed(&mut state).await;
        }
        state.external_cursor = external.len();

        debug!("History {}: synced {} external messages", self.id, delta.len());
        Ok(delta.len())
    }

    /// 开始新一轮外部同步，`baseline` 为外部列表中已记录的条数
    pub async fn reset_external_cursor(&self, baseline: usize) {
        self.state.lock().await.external_cursor = baseline;
    }

    /// 最近 `limit` 条消息（不指定则全部），按时间顺序
    pub async fn retrieve_messages(&self, limit: Option<usize>) -> Vec<Message> {
        let state = self.state.lock().await;
        let start = limit
            .map(|n| state.messages.len().saturating_sub(n))
            .unwrap_or(0);
        state.messages[start..].to_vec()
    }

    /// 不区分大小写的子串搜索：从新到旧扫描，按时间顺序返回
    pub async fn search_messages(&self, query: &str, limit: usize) -> Vec<Message> {
        let query = query.trim().to_lowercase();
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }
        let state = self.state.lock().await;
        let mut found: Vec<Message> = state
            .messages
            .iter()
            .rev()
            .filter(|m| searchable_text(m).to_lowercase().contains(&query))
            .take(limit)
            .cloned()
            .collect();
        found.reverse();
        found
    }

    pub async fn message_count(&self) -> usize {
        self.state.lock().await.messages.len()
    }

    /// 累积的摘要，尚未压缩过时为 `None`
    pub async fn get_summary(&self) -> Option<String> {
        let state = self.state.lock().await;
        (!state.summary.is_empty()).then(|| state.summary.clone())
    }

    /// 替换摘要
    pub async fn update_summary(&self, summary: impl Into<String>) {
        let mut state = self.state.lock().await;
        state.summary = summary.into();
        state.metadata.last_activity = self.clock.now();
    }

    /// 清空消息
    pub async fn clear_messages(&self, keep_summary: bool) {
        let mut state = self.state.lock().await;
        let removed = state.messages.len();
        state.messages.clear();
        state.known_tool_calls.clear();
        if !keep_summary {
            state.summary.clear();
        }
        state.metadata.last_activity = self.clock.now();
        info!("History {} cleared {} messages", self.id, removed);
    }

    pub async fn metadata(&self) -> HistoryMetadata {
        self.state.lock().await.metadata.clone()
    }

    /// 设置自定义元数据字段
    pub async fn update_metadata(&self, key: &str, value: Value) -> StoreResult<()> {
        if key.trim().is_empty() {
            return Err(StoreError::invalid_argument("metadata key must not be empty"));
        }
        if RESERVED_METADATA_KEYS.contains(&key) {
            return Err(StoreError::invalid_argument(format!(
                "metadata key '{}' is managed by the store",
                key
            )));
        }
        let mut state = self.state.lock().await;
        state.metadata.extra.insert(key.to_string(), value);
        Ok(())
    }

    /// 读取元数据字段（包括内置字段）
    pub async fn get_metadata(&self, key: &str) -> Option<Value> {
        let metadata = self.metadata().await;
        match serde_json::to_value(metadata) {
            Ok(Value::Object(map)) => map.get(key).cloned(),
            _ => None,
        }
    }

    /// 给 LLM 用的上下文文本：摘要在前，随后是带角色前缀的近期消息
    pub async fn context_for_llm(&self) -> String {
        let state = self.state.lock().await;
        let mut out = String::new();
        if !state.summary.is_empty() {
            out.push_str("Conversation summary:\n");
            out.push_str(&state.summary);
            out.push_str("\n\n");
        }
        out.push_str("Recent history:\n");
        out.push_str(&transcript(&state.messages));
        out
    }

    async fn compact_if_needed(&self, state: &mut HistoryState) {
        if state.messages.len() <= self.config.max_history_length {
            return;
        }

        let count = state.messages.len();
        let text = transcript(&state.messages);
        let summary = match self.summarize(&text).await {
            Some(summary) => summary,
            None => format!("The conversation contained {} messages.", count),
        };

        if state.summary.is_empty() {
            state.summary = summary.clone();
        } else {
            state.summary = format!("{}\n\n{}", state.summary, summary);
        }

        let now = self.clock.now();
        state.messages.clear();
        state.messages.push(
            Message::assistant(format!(
                "During the conversation happened just a moment ago, {}. \
                 Now continue to assist the user based on this context.",
                summary.trim_end_matches('.')
            ))
            .with_timestamp(now),
        );
        state.metadata.compactions += 1;
        state.metadata.last_activity = now;

        info!(
            "History {}: compacted {} messages (compaction #{})",
            self.id, count, state.metadata.compactions
        );
    }

    async fn summarize(&self, text: &str) -> Option<String> {
        let Some(summarizer) = self.summarizer.as_ref() else {
            debug!("History {}: no summarizer configured", self.id);
            return None;
        };
        match tokio::time::timeout(self.config.summarize_timeout, summarizer.summarize(text)).await {
            Ok(Ok(summary)) if !summary.trim().is_empty() => Some(summary.trim().to_string()),
            Ok(Ok(_)) => {
                warn!("History {}: summarizer returned an empty summary", self.id);
                None
            }
            Ok(Err(e)) => {
                warn!("History {}: summarization failed: {}", self.id, e);
                None
            }
            Err(_) => {
                warn!(
                    "History {}: summarization timed out after {:?}",
                    self.id, self.config.summarize_timeout
                );
                None
            }
        }
    }

    fn build_snapshot(&self, state: &HistoryState) -> HistorySnapshot {
        let history = state
            .messages
            .iter()
            .filter_map(|m| match serde_json::to_value(m) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("History {}: cannot serialize message: {}", self.id, e);
                    None
                }
            })
            .collect();
        let mut metadata = state.metadata.clone();
        metadata.tool_call_ids = state.known_tool_calls.iter().cloned().collect();
        HistorySnapshot {
            history,
            conversation_summary: state.summary.clone(),
            session_metadata: serde_json::to_value(&metadata).unwrap_or(Value::Null),
        }
    }

    fn load_snapshot(&self, state: &mut HistoryState, snapshot: HistorySnapshot) -> usize {
        let now = self.clock.now();
        let mut messages = Vec::with_capacity(snapshot.history.len());
        for (index, raw) in snapshot.history.into_iter().enumerate() {
            let message = match serde_json::from_value::<Message>(raw) {
                Ok(message) => message,
                Err(e) => {
                    warn!("History {}: skipping unreadable message #{}: {}", self.id, index, e);
                    continue;
                }
            };
            if let Err(e) = message.validate() {
                warn!("History {}: skipping invalid message #{}: {}", self.id, index, e);
                continue;
            }
            messages.push(message);
        }

        let mut metadata = match serde_json::from_value::<HistoryMetadata>(snapshot.session_metadata) {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!("History {}: no usable metadata in snapshot: {}", self.id, e);
                HistoryMetadata::new(&self.id, self.config.max_history_length, now)
            }
        };
        metadata.context_id = self.id.clone();
        metadata.max_history_length = self.config.max_history_length;
        metadata.total_messages = metadata.total_messages.max(messages.len() as u64);

        state.known_tool_calls = std::mem::take(&mut metadata.tool_call_ids)
            .into_iter()
            .chain(
                messages
                    .iter()
                    .flat_map(|m| m.tool_call_ids().map(str::to_string)),
            )
            .collect();
        state.messages = messages;
        state.summary = snapshot.conversation_summary;
        state.metadata = metadata;
        state.external_cursor = 0;
        state.messages.len()
    }
}

#[async_trait]
impl Snapshot for History {
    type Data = HistorySnapshot;

    async fn serialize(&self) -> HistorySnapshot {
        let state = self.state.lock().await;
        self.build_snapshot(&state)
    }

    async fn deserialize(&self, data: HistorySnapshot) -> usize {
        let mut state = self.state.lock().await;
        let loaded = self.load_snapshot(&mut state, data);
        // 历史可能来自更大的上限，按当前上限压缩
        self.compact_if_needed(&mut state).await;
        loaded
    }

    async fn persist(&self) -> bool {
        let state = self.state.lock().await;
        let snapshot = self.build_snapshot(&state);
        match durable::write_json_atomic(&self.file_path, &snapshot).await {
            Ok(()) => {
                debug!(
                    "History {} persisted {} messages to {:?}",
                    self.id,
                    snapshot.history.len(),
                    self.file_path
                );
                true
            }
            Err(e) => {
                warn!("History {} persist to {:?} failed: {}", self.id, self.file_path, e);
                false
            }
        }
    }

    async fn restore(&self) -> bool {
        let Some(snapshot) = durable::read_json::<HistorySnapshot>(&self.file_path).await else {
            return false;
        };
        let count = self.deserialize(snapshot).await;
        info!("History {} restored {} messages", self.id, count);
        true
    }

    fn file_path(&self) -> &Path {
        &self.file_path
    }
}

fn searchable_text(message: &Message) -> String {
    let mut text = message.text_content();
    for call in message.tool_calls.iter().flatten() {
        text.push(' ');
        text.push_str(&call.function.name);
        text.push(' ');
        text.push_str(&call.function.arguments);
    }
    text
}

/// 每条消息一行，带角色前缀
fn transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            if m.has_tool_calls() {
                let calls: Vec<String> = m
                    .tool_calls
                    .iter()
                    .flatten()
                    .map(|c| format!("{}({})", c.function.name, c.function.arguments))
                    .collect();
                format!("{}: [tool calls: {}]", m.role, calls.join(", "))
            } else {
                format!("{}: {}", m.role, m.text_content())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::{ManualClock, SummarizeError, ToolCall};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Returns "summary N" on the N-th call
    #[derive(Default)]
    struct CountingSummarizer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Summarizer for CountingSummarizer {
        async fn summarize(&self, _text: &str) -> Result<String, SummarizeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("summary {}", n))
        }
    }

    struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(&self, _text: &str) -> Result<String, SummarizeError> {
            Err(SummarizeError::Failed("model error".to_string()))
        }
    }

    fn history(dir: &TempDir, max: usize) -> History {
        History::new(
            "h1",
            dir.path().join("ctx_h1.json"),
            HistoryConfig::default().with_max_history_length(max),
        )
        .with_summarizer(Arc::new(CountingSummarizer::default()))
    }

    #[tokio::test]
    async fn test_compaction_keeps_bound() {
        let dir = TempDir::new().unwrap();
        let h = history(&dir, 3);

        for i in 0..4 {
            h.store_message(Message::user(format!("message {}", i))).await.unwrap();
            assert!(h.message_count().await <= 3);
        }

        let summary = h.get_summary().await.unwrap();
        assert_eq!(summary, "summary 1");

        let messages = h.retrieve_messages(None).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::Assistant);
        assert!(messages[0]
            .text_content()
            .starts_with("During the conversation happened just a moment ago, summary 1"));
        assert_eq!(h.metadata().await.compactions, 1);
        assert_eq!(h.metadata().await.total_messages, 4);
    }

    #[tokio::test]
    async fn test_summaries_accumulate() {
        let dir = TempDir::new().unwrap();
        let h = history(&dir, 2);

        for i in 0..6 {
            h.store_message(Message::user(format!("m{}", i))).await.unwrap();
            assert!(h.message_count().await <= 2);
        }

        let summary = h.get_summary().await.unwrap();
        assert!(summary.starts_with("summary 1\n\nsummary 2"), "got {:?}", summary);
        assert!(h.metadata().await.compactions >= 2);
    }

    #[tokio::test]
    async fn test_summarizer_failure_uses_fallback() {
        let dir = TempDir::new().unwrap();
        let h = History::new(
            "h1",
            dir.path().join("ctx.json"),
            HistoryConfig::default().with_max_history_length(2),
        )
        .with_summarizer(Arc::new(FailingSummarizer));

        for i in 0..3 {
            h.store_message(Message::user(format!("m{}", i))).await.unwrap();
        }
        assert_eq!(h.message_count().await, 1);
        assert_eq!(
            h.get_summary().await.as_deref(),
            Some("The conversation contained 3 messages.")
        );
    }

    #[tokio::test]
    async fn test_invalid_tool_message_rejected() {
        let dir = TempDir::new().unwrap();
        let h = history(&dir, 10);
        h.store_message(Message::user("hi")).await.unwrap();

        let mut bad = Message::tool("call_1", "x");
        bad.tool_call_id = None;
        let err = h.store_message(bad).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(ValidationError::MissingToolCallId)));

        let err = h.store_message(Message::tool("never_issued", "x")).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(ValidationError::UnknownToolCallId(_))));

        assert_eq!(h.message_count().await, 1);
        assert_eq!(h.metadata().await.total_messages, 1);
    }

    #[tokio::test]
    async fn test_tool_result_after_call() {
        let dir = TempDir::new().unwrap();
        let h = history(&dir, 10);

        let call = ToolCall::new("call_1", "sketch_pad_operations", r#"{"operation":"list"}"#);
        h.store_message(Message::assistant_tool_calls(vec![call])).await.unwrap();
        h.store_message(Message::tool("call_1", "[]")).await.unwrap();
        assert_eq!(h.message_count().await, 2);
    }

    #[tokio::test]
    async fn test_tool_result_after_compaction_and_restore() {
        let dir = TempDir::new().unwrap();
        let h = history(&dir, 2);

        let call = ToolCall::new("call_1", "sketch_pad_operations", r#"{"operation":"stats"}"#);
        h.store_message(Message::user("show stats")).await.unwrap();
        h.store_message(Message::assistant_tool_calls(vec![call])).await.unwrap();
        h.store_message(Message::user("still there?")).await.unwrap();
        assert_eq!(h.metadata().await.compactions, 1);
        assert!(h.persist().await);

        let restored = history(&dir, 2);
        assert!(restored.restore().await);
        assert!(restored.metadata().await.tool_call_ids.is_empty());
        restored
            .store_message(Message::tool("call_1", "3 items"))
            .await
            .unwrap();

        let err = restored
            .store_message(Message::tool("call_2", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(ValidationError::UnknownToolCallId(_))));
    }

    #[tokio::test]
    async fn test_sync_with_external_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let h = history(&dir, 10).with_clock(clock.clone());

        let mut external = vec![Message::user("question"), Message::assistant("answer")];
        assert_eq!(h.sync_with_external(&external).await.unwrap(), 2);
        assert_eq!(h.sync_with_external(&external).await.unwrap(), 0);
        assert_eq!(h.message_count().await, 2);

        external.push(Message::user("follow up"));
        assert_eq!(h.sync_with_external(&external).await.unwrap(), 1);

        let messages = h.retrieve_messages(None).await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].text_content(), "follow up");
        assert_eq!(messages[2].timestamp, Some(clock.now()));
    }

    #[tokio::test]
    async fn test_sync_validates_whole_delta_first() {
        let dir = TempDir::new().unwrap();
        let h = history(&dir, 10);

        let call = ToolCall::new("c1", "f", "{}");
        let good = vec![
            Message::assistant_tool_calls(vec![call]),
            Message::tool("c1", "ok"),
        ];
        assert_eq!(h.sync_with_external(&good).await.unwrap(), 2);

        let mut bad = good.clone();
        bad.push(Message::user("fine"));
        bad.push(Message::tool("c2", "dangling"));
        assert!(h.sync_with_external(&bad).await.is_err());
        assert_eq!(h.message_count().await, 2);
    }

    #[tokio::test]
    async fn test_sync_shrunk_list_and_reset() {
        let dir = TempDir::new().unwrap();
        let h = history(&dir, 10);

        let turn = vec![Message::user("a"), Message::assistant("b"), Message::user("c")];
        h.sync_with_external(&turn).await.unwrap();

        assert_eq!(h.sync_with_external(&turn[..1]).await.unwrap(), 0);
        assert_eq!(h.message_count().await, 3);

        h.reset_external_cursor(0).await;
        let next_turn = vec![Message::user("new turn")];
        assert_eq!(h.sync_with_external(&next_turn).await.unwrap(), 1);
        assert_eq!(h.message_count().await, 4);
    }

    #[tokio::test]
    async fn test_sync_survives_compaction() {
        let dir = TempDir::new().unwrap();
        let h = history(&dir, 2);

        let mut external: Vec<Message> = (0..3).map(|i| Message::user(format!("m{}", i))).collect();
        h.sync_with_external(&external).await.unwrap();
        assert!(h.message_count().await <= 2);

        assert_eq!(h.sync_with_external(&external).await.unwrap(), 0);
        external.push(Message::user("m3"));
        assert_eq!(h.sync_with_external(&external).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_and_retrieve() {
        let dir = TempDir::new().unwrap();
        let h = history(&dir, 10);

        h.store_message(Message::user("Rust question one")).await.unwrap();
        h.store_message(Message::assistant("unrelated")).await.unwrap();
        h.store_message(Message::user("another RUST question")).await.unwrap();
        h.store_message(Message::user("rust again")).await.unwrap();

        let found = h.search_messages("rust", 2).await;
        let texts: Vec<String> = found.iter().map(|m| m.text_content()).collect();
        assert_eq!(texts, vec!["another RUST question", "rust again"]);

        let last = h.retrieve_messages(Some(2)).await;
        assert_eq!(last[0].text_content(), "another RUST question");
        assert_eq!(h.retrieve_messages(Some(100)).await.len(), 4);
        assert!(h.search_messages("", 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_summary_and_clear() {
        let dir = TempDir::new().unwrap();
        let h = history(&dir, 10);

        assert!(h.get_summary().await.is_none());
        h.update_summary("earlier work").await;
        h.store_message(Message::user("hi")).await.unwrap();

        let context = h.context_for_llm().await;
        assert!(context.starts_with("Conversation summary:\nearlier work"));
        assert!(context.ends_with("Recent history:\nuser: hi"));

        h.clear_messages(true).await;
        assert_eq!(h.message_count().await, 0);
        assert_eq!(h.get_summary().await.as_deref(), Some("earlier work"));

        h.clear_messages(false).await;
        assert!(h.get_summary().await.is_none());
    }

    #[tokio::test]
    async fn test_metadata() {
        let dir = TempDir::new().unwrap();
        let h = history(&dir, 7);

        h.update_metadata("topic", json!("parsers")).await.unwrap();
        assert_eq!(h.get_metadata("topic").await, Some(json!("parsers")));
        assert_eq!(h.get_metadata("max_history_length").await, Some(json!(7)));
        assert!(h.update_metadata("compactions", json!(0)).await.is_err());
        assert!(h.get_metadata("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_persist_restore_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ctx_rt.json");
        let h = History::new("rt", &path, HistoryConfig::default());

        let call = ToolCall::new("c1", "f", "{}");
        h.store_message(Message::system("be brief")).await.unwrap();
        h.store_message(Message::user("hi").with_name("alice")).await.unwrap();
        h.store_message(Message::assistant_tool_calls(vec![call])).await.unwrap();
        h.store_message(Message::tool("c1", "done")).await.unwrap();
        h.update_summary("so far").await;
        h.update_metadata("topic", json!("x")).await.unwrap();
        assert!(h.persist().await);

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw["history"][2]["content"].is_null());
        assert_eq!(raw["conversation_summary"], "so far");

        let fresh = History::new("rt", &path, HistoryConfig::default());
        assert!(fresh.restore().await);
        assert_eq!(fresh.retrieve_messages(None).await, h.retrieve_messages(None).await);
        assert_eq!(fresh.get_summary().await.as_deref(), Some("so far"));
        assert_eq!(fresh.get_metadata("topic").await, Some(json!("x")));

        // tool call ids are rebuilt on load
        fresh.store_message(Message::tool("c1", "again")).await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_skips_bad_messages() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ctx_bad.json");
        let snapshot = json!({
            "history": [
                {"role": "user", "content": "ok"},
                {"role": "narrator", "content": "unknown role"},
                {"role": "tool", "content": "no call id"},
                {"role": "assistant", "content": "fine"}
            ],
            "conversation_summary": "",
            "session_metadata": "garbage"
        });
        std::fs::write(&path, snapshot.to_string()).unwrap();

        let h = History::new("bad", &path, HistoryConfig::default());
        assert!(h.restore().await);
        assert_eq!(h.message_count().await, 2);
        assert_eq!(h.metadata().await.context_id, "bad");
    }

    #[tokio::test]
    async fn test_restore_missing_file() {
        let dir = TempDir::new().unwrap();
        let h = History::new("none", dir.path().join("ctx_none.json"), HistoryConfig::default());
        assert!(!h.restore().await);
    }

    #[test]
    fn test_config_validation() {
        assert!(HistoryConfig::default().validate().is_ok());
        assert!(HistoryConfig::default()
            .with_max_history_length(0)
            .validate()
            .is_err());
    }
}
