//! 响应缓存：相同模型 + 相同消息 + 相同温度直接返回上次结果

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::llm::{CompletionRequest, LlmClient, LlmError};

/// 进程内缓存包装；`enabled = false` 时透传
pub struct CachedLlmClient<C> {
    inner: C,
    enabled: bool,
    entries: RwLock<HashMap<String, String>>,
}

impl<C: LlmClient> CachedLlmClient<C> {
    pub fn new(inner: C, enabled: bool) -> Self {
        Self {
            inner,
            enabled,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn cache_key(&self, request: &CompletionRequest) -> String {
        let messages = serde_json::to_string(&request.messages).unwrap_or_default();
        format!(
            "{}:{:?}:{}",
            self.inner.model_name(),
            request.temperature,
            messages
        )
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[async_trait]
impl<C: LlmClient> LlmClient for CachedLlmClient<C> {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        if !self.enabled {
            return self.inner.complete(request).await;
        }

        let key = self.cache_key(request);
        if let Some(hit) = self.entries.read().await.get(&key) {
            tracing::debug!(model = self.inner.model_name(), "llm cache hit");
            return Ok(hit.clone());
        }

        let text = self.inner.complete(request).await?;
        self.entries.write().await.insert(key, text.clone());
        Ok(text)
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}
