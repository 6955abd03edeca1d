//! 嵌入：供长期记忆使用
//!
//! OpenAiEmbedder 调用 OpenAI 兼容的 /embeddings 端点；HashingEmbedder 在本地把分词结果哈希到固定维度，
//! 无需网络，结果确定，适合离线运行与测试。

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;

use crate::config::MemorySection;
use crate::llm::openai::{openai_config, resolve_api_key};
use crate::llm::LlmError;
use crate::memory::tokenizer;

/// 嵌入提供方：文本 → 向量
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    /// 与 LLM 共用 OPENAI_API_KEY / base_url
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Result<Self, LlmError> {
        let api_key = resolve_api_key(api_key)
            .ok_or_else(|| LlmError::Config("OPENAI_API_KEY is not set".to_string()))?;
        Ok(Self {
            client: Client::with_config(openai_config(base_url, api_key)),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(vec![]);
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::String(text.to_string()))
            .build()
            .map_err(|e| LlmError::Config(e.to_string()))?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| LlmError::ApiError(e.to_string()))?;
        response
            .data
            .first()
            .map(|e| e.embedding.clone())
            .ok_or(LlmError::EmptyResponse)
    }
}

/// 本地特征哈希嵌入：词频落入 `dims` 个桶后做 L2 归一化
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    fn bucket(&self, token: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        (hasher.finish() % self.dims as u64) as usize
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for token in tokenizer::tokenize(text) {
            vector[self.bucket(&token)] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        Ok(self.embed_text(text))
    }
}

/// 有 API Key 且 provider 为 openai 时使用远端嵌入，否则退回本地哈希嵌入
pub fn create_embedder_from_config(
    provider: &str,
    base_url: Option<&str>,
    memory: &MemorySection,
) -> Arc<dyn EmbeddingProvider> {
    if provider == "openai" {
        match OpenAiEmbedder::new(base_url, &memory.embedding_model, None) {
            Ok(embedder) => return Arc::new(embedder),
            Err(e) => tracing::warn!(error = %e, "remote embedding unavailable, using local hashing"),
        }
    }
    Arc::new(HashingEmbedder::new(memory.embedding_dims))
}
