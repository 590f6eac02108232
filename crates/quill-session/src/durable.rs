//! 持久层：单文件 JSON 快照
//!
//! 写入先落到同目录的临时文件再 rename，读取失败只记录日志并返回 `None`。

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::StoreResult;

/// 原子写入 JSON 快照
pub(crate) async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    let content = serde_json::to_vec_pretty(value)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "snapshot".to_string());
    let tmp_path = path.with_file_name(format!(
        ".{}.{}.tmp",
        file_name,
        uuid::Uuid::new_v4().simple()
    ));

    let written = async {
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&content).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, path).await
    }
    .await;

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(e.into());
    }

    debug!("Wrote snapshot: {:?}", path);
    Ok(())
}

/// 读取 JSON 快照；文件不存在或损坏时返回 `None`
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No snapshot at {:?}", path);
            return None;
        }
        Err(e) => {
            warn!("Failed to read snapshot {:?}: {}", path, e);
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Corrupt snapshot {:?}: {}", path, e);
            None
        }
    }
}

/// 删除文件，返回文件之前是否存在
pub(crate) async fn remove_if_exists(path: &Path) -> StoreResult<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
