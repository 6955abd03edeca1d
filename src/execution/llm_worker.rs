//! 通用 LLM Worker：按角色选择 system prompt，把任务描述、输入与上游结果交给 LLM

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::execution::worker::{Worker, WorkerRegistry};
use crate::llm::LlmClient;
use crate::planning::{CapabilityRole, TaskNode};

const RESEARCHER_PROMPT: &str = "You are a senior research analyst specializing in startup and technology markets. Extract key insights, identify patterns and trends, and summarize findings clearly and concisely.";
const MARKET_ANALYST_PROMPT: &str = "You are a senior market analyst with expertise in startup ecosystems and technology markets. Analyze market dynamics, size and growth potential, competitive landscapes and maturity. Provide data-driven, objective analysis.";
const IDEA_GENERATOR_PROMPT: &str = "You are a creative startup ideation expert. Generate innovative, feasible, market-driven ideas that solve real problems and address unmet needs.";
const EVALUATOR_PROMPT: &str = "You are a senior startup evaluator. Assess product-market fit, feasibility and risk. Be honest, specific and constructive.";

pub fn role_system_prompt(role: &CapabilityRole) -> String {
    match role {
        CapabilityRole::Researcher => RESEARCHER_PROMPT.to_string(),
        CapabilityRole::MarketAnalyst => MARKET_ANALYST_PROMPT.to_string(),
        CapabilityRole::IdeaGenerator => IDEA_GENERATOR_PROMPT.to_string(),
        CapabilityRole::Evaluator => EVALUATOR_PROMPT.to_string(),
        CapabilityRole::Custom(name) => format!(
            "You are a specialist acting as `{}`. Complete the assigned task precisely and report your output.",
            name
        ),
    }
}

pub struct LlmWorker {
    name: String,
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    temperature: Option<f32>,
}

impl LlmWorker {
    pub fn new(role: &CapabilityRole, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            name: format!("llm:{}", role),
            llm,
            system_prompt: role_system_prompt(role),
            temperature: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn build_prompt(task: &TaskNode) -> String {
        let mut prompt = format!("Task: {}\nTask type: {}\n", task.description, task.task_type);
        if !task.input.is_empty() {
            let input = serde_json::to_string_pretty(&task.input).unwrap_or_default();
            prompt.push_str(&format!("\nInput:\n{}\n", input));
        }
        prompt.push_str("\nRespond with your findings for this task only.");
        prompt
    }
}

#[async_trait]
impl Worker for LlmWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, task: &TaskNode) -> Result<Value, String> {
        let prompt = Self::build_prompt(task);
        self.llm
            .query(&prompt, &self.system_prompt, self.temperature)
            .await
            .map(Value::String)
            .map_err(|e| e.to_string())
    }
}

/// 为四种内置角色各注册一个 LlmWorker
pub fn default_registry(llm: Arc<dyn LlmClient>, temperature: f32) -> WorkerRegistry {
    let mut registry = WorkerRegistry::new();
    for role in CapabilityRole::builtin() {
        let worker = LlmWorker::new(&role, llm.clone()).with_temperature(temperature);
        registry.register(role, worker);
    }
    registry
}
