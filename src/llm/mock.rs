//! Mock / Scripted LLM 客户端（用于离线运行与测试，无需 API）
//!
//! - MockLlmClient：按 system prompt 关键字返回固定的分解计划、评审 JSON 或回显
//! - ScriptedLlmClient：按顺序返回预设结果，队列耗尽后重复最后一条成功回复

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::llm::{CompletionRequest, LlmClient, LlmError};

/// 约 4 个字符折算 1 个 token
fn estimate_tokens(chars: usize) -> u64 {
    (chars as u64).div_ceil(4)
}

const MOCK_PLAN: &str = r#"[
  {"description": "Research the problem space", "task_type": "research", "dependencies": [], "agent_role": "researcher", "input_data": {}},
  {"description": "Analyze market signals", "task_type": "analysis", "dependencies": [0], "agent_role": "market_analyst", "input_data": {}},
  {"description": "Synthesize findings into recommendations", "task_type": "synthesis", "dependencies": [1], "agent_role": "idea_generator", "input_data": {}}
]"#;

const MOCK_CRITIQUE: &str = r#"{
  "completeness_score": 0.8,
  "evidence_strength_score": 0.75,
  "coherence_score": 0.85,
  "actionability_score": 0.8,
  "weaknesses": [],
  "missing_components": [],
  "improvement_suggestions": [],
  "should_iterate": false,
  "confidence": 0.6
}"#;

/// Mock 客户端：分解请求返回三步计划，评审请求返回通过的评分，其余回显最后一条 user 消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let system = request.system().unwrap_or("").to_lowercase();
        if system.contains("breaking down") {
            return Ok(MOCK_PLAN.to_string());
        }
        if system.contains("evaluator") {
            return Ok(MOCK_CRITIQUE.to_string());
        }
        let last_user = request.last_user().unwrap_or("(no input)");
        Ok(format!("Echo from Mock: {}", last_user))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// 按脚本返回结果的客户端；记录每次收到的请求
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    last_ok: Mutex<Option<String>>,
    requests: Mutex<Vec<CompletionRequest>>,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl ScriptedLlmClient {
    pub fn new<S: Into<String>>(responses: Vec<S>) -> Self {
        Self::from_results(responses.into_iter().map(|r| Ok(r.into())).collect())
    }

    pub fn from_results(results: Vec<Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            ..Self::default()
        }
    }

    /// 已收到的请求（按调用顺序）
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        self.prompt_tokens
            .fetch_add(estimate_tokens(request.char_count()), Ordering::Relaxed);

        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let mut last_ok = self.last_ok.lock().unwrap_or_else(PoisonError::into_inner);
        let result = match next {
            Some(Ok(text)) => {
                *last_ok = Some(text.clone());
                Ok(text)
            }
            Some(Err(e)) => Err(e),
            None => last_ok.clone().ok_or(LlmError::EmptyResponse),
        };

        if let Ok(text) = &result {
            self.completion_tokens
                .fetch_add(estimate_tokens(text.chars().count()), Ordering::Relaxed);
        }
        result
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        let prompt = self.prompt_tokens.load(Ordering::Relaxed);
        let completion = self.completion_tokens.load(Ordering::Relaxed);
        (prompt, completion, prompt + completion)
    }
}
