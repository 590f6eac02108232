//! # Session
//!
//! 一个会话持有一个 SketchPad 和一个 History，两者使用同一个会话 id。
//!
//! 通过 [`Session::enter`] 进入会话作用域后，库代码可以用
//! [`current_sketch_pad`] / [`current_history`] 取到当前会话的存储，
//! 不需要层层传递引用。作用域不允许嵌套；作用域之外调用会返回
//! [`StoreError::NoActiveSession`]，不会回退到任何默认实例。

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use quill_core::Clock;
use tracing::Instrument;

use crate::error::{StoreError, StoreResult};
use crate::history::History;
use crate::sketch_pad::SketchPad;

tokio::task_local! {
    static CURRENT_SESSION: Arc<Session>;
}

/// SketchPad 与 History 的配对
pub struct Session {
    id: String,
    sketch_pad: Arc<SketchPad>,
    history: Arc<History>,
    created_at: DateTime<Utc>,
    last_accessed: RwLock<DateTime<Utc>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("last_accessed", &*self.last_accessed.read())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(
        id: impl Into<String>,
        sketch_pad: SketchPad,
        history: History,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        Self {
            id: id.into(),
            sketch_pad: Arc::new(sketch_pad),
            history: Arc::new(history),
            created_at: now,
            last_accessed: RwLock::new(now),
            clock,
        }
    }

    /// 恢复的会话沿用最初的创建时间
    pub(crate) fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sketch_pad(&self) -> &Arc<SketchPad> {
        &self.sketch_pad
    }

    pub fn history(&self) -> &Arc<History> {
        &self.history
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_accessed(&self) -> DateTime<Utc> {
        *self.last_accessed.read()
    }

    /// 刷新最后访问时间
    pub fn touch(&self) {
        *self.last_accessed.write() = self.clock.now();
    }

    /// 已空闲的时长
    pub fn idle_for(&self) -> chrono::Duration {
        self.clock.now().signed_duration_since(self.last_accessed())
    }

    /// 在该会话的作用域内运行 `fut`
    ///
    /// 已经处于某个会话作用域时返回 [`StoreError::NestedScope`]，`fut` 不会被执行。
    pub async fn enter<F, T>(self: &Arc<Self>, fut: F) -> StoreResult<T>
    where
        F: Future<Output = T>,
    {
        if let Ok(active) = CURRENT_SESSION.try_with(|s| s.id.clone()) {
            return Err(StoreError::NestedScope {
                active,
                requested: self.id.clone(),
            });
        }

        self.touch();
        let span = session_span(&self.id);
        Ok(CURRENT_SESSION
            .scope(Arc::clone(self), fut.instrument(span))
            .await)
    }
}

fn session_span(session_id: &str) -> tracing::Span {
    tracing::info_span!("session", session_id = %session_id)
}

/// 当前作用域中的会话
pub fn current_session() -> StoreResult<Arc<Session>> {
    CURRENT_SESSION
        .try_with(Arc::clone)
        .map_err(|_| StoreError::NoActiveSession)
}

/// 当前会话的 SketchPad
pub fn current_sketch_pad() -> StoreResult<Arc<SketchPad>> {
    current_session().map(|s| Arc::clone(&s.sketch_pad))
}

/// 当前会话的 History
pub fn current_history() -> StoreResult<Arc<History>> {
    current_session().map(|s| Arc::clone(&s.history))
}

/// 是否处于会话作用域中
pub fn in_session_scope() -> bool {
    CURRENT_SESSION.try_with(|_| ()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryConfig;
    use crate::store::{KeyValueStore, SetRequest};
    use quill_core::{ManualClock, Message};
    use std::time::Duration;
    use tempfile::TempDir;

    fn session(dir: &TempDir, id: &str, clock: Arc<ManualClock>) -> Arc<Session> {
        let pad = SketchPad::in_memory(id, dir.path().join(format!("skt_{}.json", id)));
        let history = History::new(
            id,
            dir.path().join(format!("ctx_{}.json", id)),
            HistoryConfig::default(),
        );
        Arc::new(Session::new(id, pad, history, clock))
    }

    #[tokio::test]
    async fn test_no_active_session_outside_scope() {
        assert!(!in_session_scope());
        assert!(matches!(current_session(), Err(StoreError::NoActiveSession)));
        assert!(matches!(current_sketch_pad(), Err(StoreError::NoActiveSession)));
        assert!(matches!(current_history(), Err(StoreError::NoActiveSession)));
    }

    #[tokio::test]
    async fn test_enter_exposes_current_stores() {
        let dir = TempDir::new().unwrap();
        let s = session(&dir, "s1", Arc::new(ManualClock::starting_now()));

        let key = s
            .enter(async {
                let pad = current_sketch_pad()?;
                current_history()?.store_message(Message::user("hi")).await?;
                pad.set(SetRequest::new("v").with_key("k")).await
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(key, "k");
        assert!(s.sketch_pad().exists("k").await);
        assert_eq!(s.history().message_count().await, 1);
        assert!(!in_session_scope());
    }

    #[tokio::test]
    async fn test_nested_scope_is_rejected() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let outer = session(&dir, "outer", clock.clone());
        let inner = session(&dir, "inner", clock);

        let result = outer
            .enter(async {
                let nested = inner.enter(async { current_session().map(|s| s.id().to_string()) }).await;
                let still_outer = current_session().map(|s| s.id().to_string());
                (nested, still_outer)
            })
            .await
            .unwrap();

        match result.0 {
            Err(StoreError::NestedScope { active, requested }) => {
                assert_eq!(active, "outer");
                assert_eq!(requested, "inner");
            }
            other => panic!("expected nested scope error, got {:?}", other),
        }
        assert_eq!(result.1.unwrap(), "outer");
    }

    #[tokio::test]
    async fn test_scope_does_not_leak_into_spawned_tasks() {
        let dir = TempDir::new().unwrap();
        let s = session(&dir, "s1", Arc::new(ManualClock::starting_now()));

        let spawned = s
            .enter(async { tokio::spawn(async { in_session_scope() }).await.unwrap() })
            .await
            .unwrap();
        assert!(!spawned);
    }

    #[tokio::test]
    async fn test_enter_touches_session() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let s = session(&dir, "s1", clock.clone());

        clock.advance(Duration::from_secs(30));
        assert_eq!(s.idle_for().num_seconds(), 30);
        s.enter(async {}).await.unwrap();
        assert_eq!(s.idle_for().num_seconds(), 0);
        assert_eq!(s.last_accessed(), clock.now());
    }
}
