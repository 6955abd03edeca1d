//! 长期记忆：经验（Experience）的向量化存储与相似检索
//!
//! 每条经验被投影为一段可检索文本（目标、计划、任务、结果、弱点、建议、教训），嵌入后写入向量存储；
//! 元数据保留 goal / success / overall_score 等字段，供过滤检索。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::autonomy::Critique;
use crate::core::{short_hex, truncate_chars, AgentError};
use crate::llm::EmbeddingProvider;
use crate::memory::vector_store::{SearchHit, VectorStore};
use crate::planning::Plan;

const RESULT_PREVIEW_CHARS: usize = 500;
const HIT_PREVIEW_CHARS: usize = 200;
const SUCCESSFUL_EXAMPLES: usize = 2;
const MAX_RELEVANT_LINES: usize = 5;

/// 一次目标 / 计划 / 结果 / 评审的持久记录；写入后不再修改
#[derive(Debug, Clone, Serialize)]
pub struct Experience {
    pub id: String,
    pub goal: String,
    pub plan: Option<Plan>,
    pub result: Value,
    pub critique: Option<Critique>,
    pub success: bool,
    pub lessons_learned: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

impl Experience {
    pub fn new(goal: impl Into<String>, result: Value) -> Self {
        Self {
            id: format!("exp_{}", short_hex(12)),
            goal: goal.into(),
            plan: None,
            result,
            critique: None,
            success: false,
            lessons_learned: Vec::new(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn with_critique(mut self, critique: Critique) -> Self {
        self.critique = Some(critique);
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    pub fn with_lessons(mut self, lessons: Vec<String>) -> Self {
        self.lessons_learned = lessons;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 用于嵌入与展示的文本投影
    pub fn searchable_text(&self) -> String {
        let mut parts = vec![format!("Goal: {}", self.goal)];

        if let Some(plan) = &self.plan {
            parts.push(format!("Plan: {} tasks (version {})", plan.tasks.len(), plan.version));
            parts.push(format!("Tasks: {}", plan.task_descriptions().join("; ")));
        }

        let result_text = match &self.result {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        if !result_text.is_empty() {
            parts.push(format!(
                "Result: {}",
                truncate_chars(&result_text, RESULT_PREVIEW_CHARS)
            ));
        }

        if let Some(critique) = &self.critique {
            if !critique.weaknesses.is_empty() {
                parts.push(format!("Weaknesses: {}", critique.weaknesses.join("; ")));
            }
            if !critique.improvement_suggestions.is_empty() {
                parts.push(format!(
                    "Suggestions: {}",
                    critique.improvement_suggestions.join("; ")
                ));
            }
        }

        if !self.lessons_learned.is_empty() {
            parts.push(format!("Lessons: {}", self.lessons_learned.join("; ")));
        }

        parts.join("\n")
    }

    fn index_metadata(&self) -> HashMap<String, String> {
        let mut metadata = self.metadata.clone();
        metadata.insert("experience_id".into(), self.id.clone());
        metadata.insert("goal".into(), self.goal.clone());
        metadata.insert("success".into(), self.success.to_string());
        metadata.insert("timestamp".into(), self.timestamp.to_rfc3339());
        if let Some(critique) = &self.critique {
            metadata.insert(
                "overall_score".into(),
                format!("{:.2}", critique.overall_score),
            );
        }
        metadata
    }
}

/// 长期记忆：嵌入器 + 向量存储
#[derive(Clone)]
pub struct LongTermMemory {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl LongTermMemory {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    /// 写入一条经验，返回其 id
    pub async fn store_experience(&self, experience: &Experience) -> Result<String, AgentError> {
        let text = experience.searchable_text();
        let vector = self.embedder.embed(&text).await?;
        self.store
            .add(&experience.id, &text, vector, experience.index_metadata())
            .await?;
        tracing::info!(
            experience_id = %experience.id,
            success = experience.success,
            "experience stored"
        );
        Ok(experience.id.clone())
    }

    pub async fn search_experiences(
        &self,
        query: &str,
        k: usize,
        filter: Option<&HashMap<String, String>>,
    ) -> Result<Vec<SearchHit>, AgentError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(query).await?;
        self.store.search(&vector, k, filter).await
    }

    /// k 条相似经验 + 2 条成功经验，去重后最多 5 条，格式化为规划上下文；无命中时返回空串
    pub async fn retrieve_relevant_memory(
        &self,
        goal: &str,
        context: Option<&Map<String, Value>>,
        k: usize,
    ) -> Result<String, AgentError> {
        let query = match context {
            Some(ctx) if !ctx.is_empty() => format!("{} {}", goal, Value::Object(ctx.clone())),
            _ => goal.to_string(),
        };

        let similar = self.search_experiences(&query, k, None).await?;
        let success_filter = HashMap::from([("success".to_string(), "true".to_string())]);
        let successful = self
            .search_experiences(&query, SUCCESSFUL_EXAMPLES, Some(&success_filter))
            .await?;

        let mut seen = std::collections::HashSet::new();
        let lines: Vec<String> = similar
            .into_iter()
            .chain(successful)
            .filter(|hit| seen.insert(hit.id.clone()))
            .take(MAX_RELEVANT_LINES)
            .map(|hit| {
                format!(
                    "- [Similarity: {:.2}] {}...",
                    hit.similarity,
                    truncate_chars(&hit.text, HIT_PREVIEW_CHARS)
                )
            })
            .collect();

        if lines.is_empty() {
            return Ok(String::new());
        }
        Ok(format!("Relevant past experiences:\n{}", lines.join("\n")))
    }

    pub async fn len(&self) -> usize {
        self.store.count().await
    }
}
