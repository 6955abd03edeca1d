//! 向量存储：add / search 接口，进程内实现与 JSON 快照持久化实现
//!
//! 检索时先按元数据过滤，再按余弦相似度降序排列；相似度相同时保持写入顺序。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::core::AgentError;

/// 检索命中
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub metadata: HashMap<String, String>,
    pub similarity: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 写入（同 id 覆盖）
    async fn add(
        &self,
        id: &str,
        text: &str,
        vector: Vec<f32>,
        metadata: HashMap<String, String>,
    ) -> Result<(), AgentError>;

    /// `filter` 中每个键值都必须与条目元数据相等
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&HashMap<String, String>>,
    ) -> Result<Vec<SearchHit>, AgentError>;

    async fn count(&self) -> usize;
}

/// 余弦相似度；维度不一致或任一向量为零时返回 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[derive(Serialize, Deserialize)]
struct StoredVector {
    id: String,
    text: String,
    vector: Vec<f32>,
    metadata: HashMap<String, String>,
}

/// 进程内向量存储（线性扫描）
pub struct InMemoryVectorStore {
    collection: String,
    items: RwLock<Vec<StoredVector>>,
}

impl InMemoryVectorStore {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            items: RwLock::new(Vec::new()),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

fn matches_filter(metadata: &HashMap<String, String>, filter: Option<&HashMap<String, String>>) -> bool {
    filter.map_or(true, |f| {
        f.iter().all(|(k, v)| metadata.get(k).map_or(false, |m| m == v))
    })
}

fn upsert(items: &mut Vec<StoredVector>, stored: StoredVector) {
    match items.iter_mut().find(|item| item.id == stored.id) {
        Some(existing) => *existing = stored,
        None => items.push(stored),
    }
}

fn rank(
    items: &[StoredVector],
    vector: &[f32],
    top_k: usize,
    filter: Option<&HashMap<String, String>>,
) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = items
        .iter()
        .filter(|item| matches_filter(&item.metadata, filter))
        .map(|item| SearchHit {
            id: item.id.clone(),
            text: item.text.clone(),
            metadata: item.metadata.clone(),
            similarity: cosine_similarity(vector, &item.vector),
        })
        .collect();
    hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    hits.truncate(top_k);
    hits
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn add(
        &self,
        id: &str,
        text: &str,
        vector: Vec<f32>,
        metadata: HashMap<String, String>,
    ) -> Result<(), AgentError> {
        let stored = StoredVector {
            id: id.to_string(),
            text: text.to_string(),
            vector,
            metadata,
        };
        upsert(&mut *self.items.write().await, stored);
        tracing::debug!(collection = %self.collection, id, "vector stored");
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&HashMap<String, String>>,
    ) -> Result<Vec<SearchHit>, AgentError> {
        Ok(rank(&self.items.read().await, vector, top_k, filter))
    }

    async fn count(&self) -> usize {
        self.items.read().await.len()
    }
}

/// 以 `<dir>/<collection>.json` 快照持久化的向量存储
///
/// 构造时整体加载；每次 add 后重写快照（先写临时文件再改名），进程重启后经验仍可检索。
pub struct FileVectorStore {
    collection: String,
    path: PathBuf,
    items: RwLock<Vec<StoredVector>>,
}

impl FileVectorStore {
    /// 快照不存在时从空集合开始；快照无法解析时返回错误
    pub fn open(dir: impl AsRef<Path>, collection: impl Into<String>) -> Result<Self, AgentError> {
        let collection = collection.into();
        let path = dir.as_ref().join(format!("{}.json", collection));
        let items: Vec<StoredVector> = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            serde_json::from_str(&data)?
        } else {
            Vec::new()
        };
        tracing::debug!(%collection, path = %path.display(), count = items.len(), "vector snapshot loaded");
        Ok(Self {
            collection,
            path,
            items: RwLock::new(items),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, items: &[StoredVector]) -> Result<(), AgentError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(items)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for FileVectorStore {
    async fn add(
        &self,
        id: &str,
        text: &str,
        vector: Vec<f32>,
        metadata: HashMap<String, String>,
    ) -> Result<(), AgentError> {
        let stored = StoredVector {
            id: id.to_string(),
            text: text.to_string(),
            vector,
            metadata,
        };
        // 持有写锁直到快照落盘，避免并发写入交错
        let mut items = self.items.write().await;
        upsert(&mut items, stored);
        self.persist(&items).await?;
        tracing::debug!(collection = %self.collection, id, "vector stored and persisted");
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&HashMap<String, String>>,
    ) -> Result<Vec<SearchHit>, AgentError> {
        Ok(rank(&self.items.read().await, vector, top_k, filter))
    }

    async fn count(&self) -> usize {
        self.items.read().await.len()
    }
}
