//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock / Scripted）、重试与缓存包装、嵌入、JSON 提取

pub mod cache;
pub mod embedding;
pub mod json;
pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use cache::CachedLlmClient;
pub use embedding::{create_embedder_from_config, EmbeddingProvider, HashingEmbedder, OpenAiEmbedder};
pub use json::{extract_json, parse_json, parse_or_fallback};
pub use message::{CompletionRequest, Message, Role};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError, RetryConfig, RetryingLlmClient};

use crate::config::LlmSection;

/// 按配置构建 LLM 栈：后端 → 重试 → 缓存
///
/// provider 为 openai 但缺少 API Key 时退回 Mock，并输出警告。
pub fn create_llm_from_config(section: &LlmSection) -> Arc<dyn LlmClient> {
    let base: Arc<dyn LlmClient> = match section.provider.as_str() {
        "openai" => match OpenAiClient::new(section.base_url.as_deref(), &section.model, None) {
            Ok(client) => Arc::new(client.with_default_temperature(section.temperature)),
            Err(e) => {
                tracing::warn!(error = %e, "falling back to mock LLM");
                Arc::new(MockLlmClient)
            }
        },
        _ => Arc::new(MockLlmClient),
    };

    let retrying = RetryingLlmClient::new(base, RetryConfig::from(section));
    Arc::new(CachedLlmClient::new(retrying, section.cache_enabled))
}
