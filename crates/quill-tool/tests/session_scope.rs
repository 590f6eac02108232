use quill_session::{KeyValueStore, SessionManager, SessionManagerConfig};
use quill_tool::{SketchPadTool, Tool};
use tempfile::TempDir;

#[tokio::test]
async fn tool_writes_into_the_entered_session() {
    let dir = TempDir::new().unwrap();
    let manager = SessionManager::new(SessionManagerConfig::with_base_dir(dir.path()))
        .await
        .unwrap();
    let first = manager.create_session(Some("first")).await.unwrap();
    let second = manager.create_session(Some("second")).await.unwrap();
    let tool = SketchPadTool::new();

    let out = first
        .enter(tool.execute(r#"{"operation":"store","key":"k","value":"from first"}"#))
        .await
        .unwrap();
    assert_eq!(out, "Stored successfully with key: k");

    let out = second
        .enter(tool.execute(r#"{"operation":"retrieve","key":"k"}"#))
        .await
        .unwrap();
    assert_eq!(out, "Key 'k' not found");

    assert!(first.sketch_pad().exists("k").await);
    assert!(!second.sketch_pad().exists("k").await);
}

#[tokio::test]
async fn repeated_store_of_same_key_is_suffixed() {
    let dir = TempDir::new().unwrap();
    let manager = SessionManager::new(SessionManagerConfig::with_base_dir(dir.path()))
        .await
        .unwrap();
    let session = manager.create_session(None).await.unwrap();
    let tool = SketchPadTool::new();

    let outputs = session
        .enter(async {
            let a = tool
                .execute(r#"{"operation":"store","key":"result","value":"one"}"#)
                .await;
            let b = tool
                .execute(r#"{"operation":"store","key":"result","value":"two"}"#)
                .await;
            (a, b)
        })
        .await
        .unwrap();

    assert_eq!(outputs.0, "Stored successfully with key: result");
    assert_eq!(outputs.1, "Stored successfully with key: result_1");
}
