//! 两级记忆门面：短期环形缓冲 + 长期经验库
//!
//! 自主循环是短期记忆的唯一写者；读取方通过快照拿到一致视图。

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::config::AppConfig;
use crate::core::AgentError;
use crate::llm::EmbeddingProvider;
use crate::memory::long_term::LongTermMemory;
use crate::memory::short_term::{MemoryEntry, MemoryType, SessionInfo, ShortTermMemory};
use crate::memory::vector_store::FileVectorStore;

const VECTOR_DB_DIR: &str = "vector_db";

pub struct MemoryStore {
    short_term: RwLock<ShortTermMemory>,
    long_term: LongTermMemory,
    context_max_tokens: usize,
}

impl MemoryStore {
    pub fn new(short_term: ShortTermMemory, long_term: LongTermMemory, context_max_tokens: usize) -> Self {
        Self {
            short_term: RwLock::new(short_term),
            long_term,
            context_max_tokens,
        }
    }

    /// 按配置构建；长期记忆持久化在 `<data_dir>/vector_db/<collection>.json`，跨进程保留
    pub fn from_config(config: &AppConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self, AgentError> {
        let section = &config.memory;
        let store = Arc::new(FileVectorStore::open(
            config.app.data_dir.join(VECTOR_DB_DIR),
            section.long_term_collection.clone(),
        )?);
        Ok(Self::new(
            ShortTermMemory::new(section.short_term_capacity),
            LongTermMemory::new(store, embedder),
            section.context_max_tokens,
        ))
    }

    pub fn long_term(&self) -> &LongTermMemory {
        &self.long_term
    }

    /// 写入短期记忆，返回条目 id
    pub async fn remember(
        &self,
        content: impl Into<String>,
        memory_type: MemoryType,
        metadata: Option<Map<String, Value>>,
    ) -> String {
        let content = content.into();
        let id = self
            .short_term
            .write()
            .await
            .add(content, memory_type, metadata);
        tracing::debug!(entry_id = %id, %memory_type, "short-term memory written");
        id
    }

    pub async fn short_term_snapshot(&self) -> Vec<MemoryEntry> {
        self.short_term.read().await.get_all(None)
    }

    pub async fn recent(&self, n: usize, memory_type: Option<MemoryType>) -> Vec<MemoryEntry> {
        self.short_term.read().await.get_recent(n, memory_type)
    }

    pub async fn short_term_context(&self) -> String {
        self.short_term.read().await.get_context(self.context_max_tokens)
    }

    pub async fn session_info(&self) -> SessionInfo {
        self.short_term.read().await.session_info()
    }

    pub async fn clear_session(&self) {
        self.short_term.write().await.clear();
    }

    /// 合并两级记忆：近期活动 + 相关历史经验；长期检索失败时只保留近期部分
    pub async fn full_context(&self, goal: &str, k: usize) -> String {
        let mut sections = Vec::new();

        let recent = self.short_term_context().await;
        if !recent.is_empty() {
            sections.push(format!("## Recent Activity\n{}", recent));
        }

        match self.long_term.retrieve_relevant_memory(goal, None, k).await {
            Ok(relevant) if !relevant.is_empty() => {
                sections.push(format!("## Long-term Memory\n{}", relevant));
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "long-term memory retrieval failed"),
        }

        sections.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppSection, MemorySection};
    use crate::llm::HashingEmbedder;
    use crate::memory::Experience;
    use tempfile::TempDir;

    fn config(data_dir: &TempDir, capacity: usize) -> AppConfig {
        AppConfig {
            app: AppSection {
                data_dir: data_dir.path().to_path_buf(),
                ..AppSection::default()
            },
            memory: MemorySection {
                short_term_capacity: capacity,
                ..MemorySection::default()
            },
            ..AppConfig::default()
        }
    }

    fn store(data_dir: &TempDir, capacity: usize) -> MemoryStore {
        MemoryStore::from_config(&config(data_dir, capacity), Arc::new(HashingEmbedder::new(64))).unwrap()
    }

    #[tokio::test]
    async fn test_remember_respects_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let memory = store(&dir, 2);
        memory.remember("one", MemoryType::Action, None).await;
        memory.remember("two", MemoryType::Reasoning, None).await;
        memory.remember("three", MemoryType::Result, None).await;
        let contents: Vec<String> = memory
            .short_term_snapshot()
            .await
            .into_iter()
            .map(|e| e.content)
            .collect();
        assert_eq!(contents, vec!["two", "three"]);
    }

    #[tokio::test]
    async fn test_full_context_combines_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let memory = store(&dir, 10);
        assert_eq!(memory.full_context("goal", 3).await, "");

        memory.remember("Started goal", MemoryType::Action, None).await;
        memory
            .long_term()
            .store_experience(&Experience::new("market goal", Value::from("done")))
            .await
            .unwrap();

        let context = memory.full_context("market goal", 3).await;
        assert!(context.contains("## Recent Activity\n[action] Started goal"));
        assert!(context.contains("## Long-term Memory\nRelevant past experiences:"));
    }

    #[tokio::test]
    async fn test_experiences_outlive_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let first = store(&dir, 10);
        first
            .long_term()
            .store_experience(&Experience::new("pricing page audit", Value::from("three gaps")).with_success(true))
            .await
            .unwrap();
        first.remember("session only", MemoryType::Action, None).await;
        drop(first);

        let second = store(&dir, 10);
        assert_eq!(second.long_term().len().await, 1);
        assert!(second.short_term_snapshot().await.is_empty());
        let relevant = second
            .long_term()
            .retrieve_relevant_memory("pricing page audit", None, 3)
            .await
            .unwrap();
        assert!(relevant.contains("pricing page audit"));
        assert!(dir.path().join("vector_db").join("long_term_memory.json").exists());
    }
}
