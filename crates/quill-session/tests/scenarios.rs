//! End-to-end behaviour of the SketchPad and History stores.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use quill_core::{async_trait, Message, ToolCall};
use quill_session::{
    History, HistoryConfig, KeyValueStore, ManualClock, MemoryTier, SetRequest, SketchPad,
    SketchPadConfig, Snapshot, StoreError, SummarizeError, Summarizer,
};
use serde_json::json;
use tempfile::TempDir;

struct EchoSummarizer;

#[async_trait]
impl Summarizer for EchoSummarizer {
    async fn summarize(&self, text: &str) -> Result<String, SummarizeError> {
        Ok(format!("{} lines discussed", text.lines().count()))
    }
}

fn tags(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|t| t.to_string()).collect()
}

#[tokio::test]
async fn ttl_item_disappears_after_expiry() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::starting_now());
    let pad = SketchPad::in_memory("ttl", dir.path().join("skt_ttl.json")).with_clock(clock.clone());

    pad.set(SetRequest::new("hello").with_key("k1").with_ttl_secs(1))
        .await
        .unwrap();
    assert_eq!(pad.get_value("k1").await, Some(json!("hello")));

    clock.advance(Duration::from_secs(2));
    assert!(pad.get("k1").await.is_none());
}

#[tokio::test]
async fn capacity_evicts_least_recently_accessed() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::starting_now());
    let pad = SketchPad::new(
        "lru",
        dir.path().join("skt_lru.json"),
        Arc::new(MemoryTier::new()),
        SketchPadConfig::default().with_max_items(2),
    )
    .with_clock(clock.clone());

    pad.set(SetRequest::new("A").with_key("a")).await.unwrap();
    clock.advance(Duration::from_millis(10));
    pad.set(SetRequest::new("B").with_key("b")).await.unwrap();
    clock.advance(Duration::from_millis(10));
    pad.get("a").await.unwrap();
    clock.advance(Duration::from_millis(10));
    pad.set(SetRequest::new("C").with_key("c")).await.unwrap();

    let keys: BTreeSet<String> = pad.keys(None).await.into_iter().collect();
    assert_eq!(keys, tags(&["a", "c"]));
}

#[tokio::test]
async fn capacity_bound_holds_after_every_write() {
    let dir = TempDir::new().unwrap();
    let pad = SketchPad::new(
        "bound",
        dir.path().join("skt_bound.json"),
        Arc::new(MemoryTier::new()),
        SketchPadConfig::default().with_max_items(5),
    );

    for i in 0..20 {
        pad.set(SetRequest::new(format!("value {}", i))).await.unwrap();
        assert!(pad.count().await <= 5);
    }
    assert_eq!(pad.statistics().await.total_items, 5);
}

#[tokio::test]
async fn history_compacts_on_overflow() {
    let dir = TempDir::new().unwrap();
    let history = History::new(
        "h",
        dir.path().join("ctx_h.json"),
        HistoryConfig::default().with_max_history_length(3),
    )
    .with_summarizer(Arc::new(EchoSummarizer));

    let mut last_summary = String::new();
    for i in 0..10 {
        history
            .store_message(Message::user(format!("turn {}", i)))
            .await
            .unwrap();
        assert!(history.message_count().await <= 3);

        if let Some(summary) = history.get_summary().await {
            assert!(summary.starts_with(&last_summary));
            last_summary = summary;
        }
    }
    assert!(!last_summary.is_empty());
}

#[tokio::test]
async fn history_without_summarizer_still_bounded() {
    let dir = TempDir::new().unwrap();
    let history = History::new(
        "h",
        dir.path().join("ctx_h.json"),
        HistoryConfig::default().with_max_history_length(3),
    );

    for i in 0..4 {
        history
            .store_message(Message::user(format!("turn {}", i)))
            .await
            .unwrap();
    }
    assert!(history.message_count().await <= 3);
    assert_eq!(
        history.get_summary().await.as_deref(),
        Some("The conversation contained 4 messages.")
    );
}

#[tokio::test]
async fn tag_search_all_and_any() {
    let dir = TempDir::new().unwrap();
    let pad = SketchPad::in_memory("tags", dir.path().join("skt_tags.json"));

    pad.set(SetRequest::new("x").with_key("both").with_tags(["code", "review", "urgent"]))
        .await
        .unwrap();
    pad.set(SetRequest::new("y").with_key("code_only").with_tags(["code"]))
        .await
        .unwrap();
    pad.set(SetRequest::new("z").with_key("docs").with_tags(["docs"]))
        .await
        .unwrap();

    let query = tags(&["code", "review"]);
    let all: Vec<String> = pad
        .search_by_tags(&query, true)
        .await
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(all, vec!["both"]);

    let any: Vec<String> = pad
        .search_by_tags(&query, false)
        .await
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(any, vec!["both", "code_only"]);
}

#[tokio::test]
async fn persisted_pad_restores_into_fresh_instance() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("skt_p.json");

    let pad = SketchPad::in_memory("p", &path);
    for (key, value) in [("one", json!("1")), ("two", json!({"n": 2})), ("three", json!([3]))] {
        pad.set(SetRequest::new(value).with_key(key).with_tag("t")).await.unwrap();
    }
    let before = pad.list_items(false).await;
    assert!(pad.persist().await);

    let fresh = SketchPad::in_memory("p", &path);
    assert!(fresh.restore().await);

    let mut keys = fresh.keys(None).await;
    keys.sort();
    assert_eq!(keys, vec!["one", "three", "two"]);

    let after = fresh.list_items(false).await;
    for item in &before {
        let restored = after.iter().find(|i| i.key == item.key).unwrap();
        assert_eq!(restored.content_hash, item.content_hash);
        assert_eq!(restored.tags, item.tags);
    }
}

#[tokio::test]
async fn tool_message_without_call_id_is_rejected() {
    let dir = TempDir::new().unwrap();
    let history = History::new("v", dir.path().join("ctx_v.json"), HistoryConfig::default());
    history.store_message(Message::user("start")).await.unwrap();

    let mut message = Message::tool("ignored", "x");
    message.tool_call_id = None;
    let err = history.store_message(message).await.unwrap_err();

    assert!(matches!(err, StoreError::Validation(_)));
    assert!(err.is_caller_error());
    assert_eq!(history.message_count().await, 1);
}

#[tokio::test]
async fn history_round_trip_preserves_sequence() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ctx_rt.json");
    let history = History::new("rt", &path, HistoryConfig::default());

    history.store_message(Message::user("list my notes")).await.unwrap();
    history
        .store_message(Message::assistant_tool_calls(vec![ToolCall::new(
            "call_1",
            "sketch_pad_operations",
            r#"{"operation":"list"}"#,
        )]))
        .await
        .unwrap();
    history.store_message(Message::tool("call_1", "no items")).await.unwrap();
    history.store_message(Message::assistant("You have no notes.")).await.unwrap();

    let snapshot = history.serialize().await;
    let copy = History::new("rt", &path, HistoryConfig::default());
    assert_eq!(copy.deserialize(snapshot).await, 4);
    assert_eq!(
        copy.retrieve_messages(None).await,
        history.retrieve_messages(None).await
    );
}

#[tokio::test]
async fn sync_appends_only_new_tail() {
    let dir = TempDir::new().unwrap();
    let history = History::new("s", dir.path().join("ctx_s.json"), HistoryConfig::default());

    let list = vec![Message::user("a"), Message::assistant("b")];
    history.sync_with_external(&list).await.unwrap();
    history.sync_with_external(&list).await.unwrap();
    assert_eq!(history.message_count().await, 2);

    let mut grown = list.clone();
    grown.push(Message::user("c"));
    assert_eq!(history.sync_with_external(&grown).await.unwrap(), 1);
    assert_eq!(history.message_count().await, 3);
}
