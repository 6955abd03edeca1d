//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock / Scripted）实现 LlmClient::complete；`query` 是 system + user 的便捷封装。
//! RetryingLlmClient 对瞬时错误做指数退避重试，重试耗尽后才返回终止错误。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::LlmSection;
use crate::llm::CompletionRequest;

/// LLM 调用错误
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Request timed out")]
    Timeout,

    #[error("Empty response")]
    EmptyResponse,

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LlmError {
    /// 是否值得重试（网络、限流、超时）
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::ApiError(_) | LlmError::RateLimited { .. } | LlmError::Timeout
        )
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式补全，返回首条回复文本
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;

    /// query(prompt, system_prompt, temperature) → text
    async fn query(
        &self,
        prompt: &str,
        system_prompt: &str,
        temperature: Option<f32>,
    ) -> Result<String, LlmError> {
        let request = CompletionRequest::new(system_prompt, prompt).with_temperature(temperature);
        self.complete(&request).await
    }

    /// 模型名（缓存键的一部分）
    fn model_name(&self) -> &str {
        "default"
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 共享的客户端（`Arc<dyn LlmClient>`）本身也是客户端，便于层层包装
#[async_trait]
impl LlmClient for Arc<dyn LlmClient> {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        (**self).complete(request).await
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        (**self).token_usage()
    }
}

/// 重试配置
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 首次调用之后的最大重试次数
    pub max_retries: u32,
    /// 初始退避；第 n 次重试等待 backoff * 2^(n-1)
    pub backoff: Duration,
    /// 单次请求超时
    pub request_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&LlmSection> for RetryConfig {
    fn from(section: &LlmSection) -> Self {
        Self {
            max_retries: section.max_retries,
            backoff: Duration::from_millis(section.backoff_ms),
            request_timeout: Duration::from_secs(section.request_timeout_secs),
        }
    }
}

impl RetryConfig {
    fn delay_for(&self, attempt: u32, err: &LlmError) -> Duration {
        let exp = self
            .backoff
            .checked_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .unwrap_or(Duration::MAX);
        match err {
            LlmError::RateLimited { retry_after_ms } => {
                exp.max(Duration::from_millis(*retry_after_ms))
            }
            _ => exp,
        }
    }
}

/// 带重试的客户端包装
pub struct RetryingLlmClient<C> {
    inner: C,
    config: RetryConfig,
}

impl<C: LlmClient> RetryingLlmClient<C> {
    pub fn new(inner: C, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl<C: LlmClient> LlmClient for RetryingLlmClient<C> {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let attempts = self.config.max_retries + 1;
        let mut last_err = LlmError::EmptyResponse;

        for attempt in 1..=attempts {
            let result = tokio::time::timeout(self.config.request_timeout, self.inner.complete(request))
                .await
                .unwrap_or(Err(LlmError::Timeout));

            match result {
                Ok(text) => return Ok(text),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    if attempt < attempts {
                        let delay = self.config.delay_for(attempt, &e);
                        tracing::warn!(
                            attempt,
                            backoff_ms = delay.as_millis() as u64,
                            error = %e,
                            "llm: retrying after transient error"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_err = e;
                }
            }
        }

        Err(LlmError::RetriesExhausted {
            attempts,
            last: last_err.to_string(),
        })
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}
