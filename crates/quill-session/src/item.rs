//! SketchPad 条目模型及其派生字段

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// 内容哈希保留的十六进制位数
pub const CONTENT_HASH_LEN: usize = 16;

/// 值的粗略分类，用于展示和统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Text,
    Json,
    List,
    Code,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Json => "json",
            ContentType::List => "list",
            ContentType::Code => "code",
        }
    }

    /// 推断值的类型
    ///
    /// 对象为 `json`，数组为 `list`；字符串同时含有导入类和定义类关键字时为 `code`。
    pub fn infer(value: &Value) -> Self {
        const IMPORT_TOKENS: &[&str] = &["import ", "from ", "#include", "use ", "require("];
        const DEFINITION_TOKENS: &[&str] = &["def ", "class ", "function ", "fn ", "struct "];

        match value {
            Value::Object(_) => ContentType::Json,
            Value::Array(_) => ContentType::List,
            Value::String(s) => {
                let has_import = IMPORT_TOKENS.iter().any(|t| s.contains(t));
                let has_definition = DEFINITION_TOKENS.iter().any(|t| s.contains(t));
                if has_import && has_definition {
                    ContentType::Code
                } else {
                    ContentType::Text
                }
            }
            _ => ContentType::Text,
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 转为纯文本：字符串原样返回，其余输出 JSON
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 值的内容哈希（规范化 JSON 的 SHA-256，截断）
///
/// 对象的键按字典序写出，哈希不受 `serde_json` 是否保留插入顺序影响。
pub fn content_hash(value: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(value, &mut canonical);
    let mut digest = hex::encode(Sha256::digest(canonical.as_bytes()));
    digest.truncate(CONTENT_HASH_LEN);
    digest
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, inner)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(inner, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, inner) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(inner, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// 取前 `max_chars` 个字符，按字符边界截断
pub fn char_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// SketchPad 条目；键不在条目内，由存储的键空间管理
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SketchItem {
    pub value: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub content_type: ContentType,
    pub content_hash: String,
    #[serde(default)]
    pub access_count: u64,
    #[serde(default)]
    pub last_accessed: Option<DateTime<Utc>>,
}

impl SketchItem {
    /// 创建条目，哈希与类型由值推导
    pub fn new(value: Value, now: DateTime<Utc>) -> Self {
        Self {
            content_hash: content_hash(&value),
            content_type: ContentType::infer(&value),
            value,
            timestamp: now,
            expires_at: None,
            summary: None,
            tags: BTreeSet::new(),
            access_count: 0,
            last_accessed: None,
        }
    }

    /// `now` 到达过期时间后条目视为不存在
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }

    /// LRU 依据：最后读取时间，从未读取过则为创建时间
    pub fn recency(&self) -> DateTime<Utc> {
        self.last_accessed.unwrap_or(self.timestamp)
    }

    /// 记录一次读取
    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        self.last_accessed = Some(now);
    }

    /// 载入的条目必须有哈希，且过期时间晚于创建时间
    pub(crate) fn is_well_formed(&self) -> bool {
        !self.content_hash.is_empty()
            && self.expires_at.map(|at| at > self.timestamp).unwrap_or(true)
    }

    /// 在键、摘要和值的前缀中做不区分大小写的匹配
    pub(crate) fn matches_query(&self, key: &str, query_lower: &str, prefix_chars: usize) -> bool {
        let value_text = stringify(&self.value);
        let haystack = format!(
            "{} {} {}",
            key,
            self.summary.as_deref().unwrap_or_default(),
            char_prefix(&value_text, prefix_chars)
        );
        haystack.to_lowercase().contains(query_lower)
    }
}

/// 列表展示用的条目视图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SketchListItem {
    pub key: String,
    pub summary: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub tags: BTreeSet<String>,
    pub content_type: ContentType,
    pub access_count: u64,
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl SketchListItem {
    pub(crate) fn from_item(key: &str, item: &SketchItem, include_value: bool) -> Self {
        Self {
            key: key.to_string(),
            summary: item.summary.clone(),
            timestamp: item.timestamp,
            tags: item.tags.clone(),
            content_type: item.content_type,
            access_count: item.access_count,
            content_hash: item.content_hash.clone(),
            value: include_value.then(|| item.value.clone()),
        }
    }
}

/// SketchPad 统计信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SketchPadStatistics {
    pub total_items: usize,
    pub max_items: usize,
    pub items_with_summary: usize,
    pub total_accesses: u64,
    /// 使用最多的标签，按次数降序
    pub popular_tags: Vec<(String, usize)>,
    pub content_types: std::collections::BTreeMap<String, usize>,
    pub avg_access_per_item: f64,
    pub memory_usage_percent: f64,
    /// 共享快速层故障，正在使用私有内存层
    pub degraded: bool,
}
