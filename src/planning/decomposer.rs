//! 目标分解：目标 → 任务规格列表 → 带 id 的任务节点
//!
//! LLM 输出先走 JSON 主解析（代码块 / 裸数组 / 单个对象），失败时走编号列表启发式解析；
//! 二者都得不到任务时，退回单个 research 任务。依赖引用（位置或描述）在这里解析为具体 id。

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};

use crate::core::{short_hex, AgentError};
use crate::llm::{extract_json, parse_or_fallback, LlmClient};
use crate::planning::types::{CapabilityRole, DependencyRef, TaskNode, TaskSpec};

pub(crate) const DECOMPOSER_SYSTEM_PROMPT: &str = "You are an expert at breaking down complex goals into structured, executable task sequences. Be specific and practical.";

/// 目标分解能力
#[async_trait]
pub trait GoalDecomposer: Send + Sync {
    async fn decompose(
        &self,
        goal: &str,
        context: Option<&Map<String, Value>>,
    ) -> Result<Vec<TaskSpec>, AgentError>;
}

/// 基于 LLM 的分解器
pub struct LlmGoalDecomposer {
    llm: Arc<dyn LlmClient>,
    temperature: Option<f32>,
}

impl LlmGoalDecomposer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn build_prompt(goal: &str, context: Option<&Map<String, Value>>) -> String {
        let context_block = match context {
            Some(ctx) if !ctx.is_empty() => {
                let pretty = serde_json::to_string_pretty(ctx).unwrap_or_default();
                format!("\nContext from previous work:\n{}\n", pretty)
            }
            _ => String::new(),
        };

        format!(
            r#"Break down the following high-level goal into a structured sequence of specific, actionable tasks.

Goal: {goal}
{context_block}
For research and market intelligence goals, typical steps include:
1. Information retrieval and research
2. Data analysis and pattern identification
3. Opportunity identification
4. Evaluation and scoring
5. Synthesis and reporting

Provide a JSON array of tasks, each with:
{{
    "description": "Clear, specific task description",
    "task_type": "research|analysis|generation|evaluation|synthesis",
    "dependencies": [0],
    "agent_role": "researcher|market_analyst|idea_generator|evaluator",
    "input_data": {{"key": "value"}}
}}

"dependencies" lists the 0-based positions (or exact descriptions) of earlier tasks; use [] for tasks that can start immediately.
Dependencies must form a DAG and agent roles must match task types.

Return ONLY the JSON array, no additional text."#
        )
    }
}

#[async_trait]
impl GoalDecomposer for LlmGoalDecomposer {
    async fn decompose(
        &self,
        goal: &str,
        context: Option<&Map<String, Value>>,
    ) -> Result<Vec<TaskSpec>, AgentError> {
        let prompt = Self::build_prompt(goal, context);
        let response = self
            .llm
            .query(&prompt, DECOMPOSER_SYSTEM_PROMPT, self.temperature)
            .await?;
        Ok(parse_task_specs(&response, goal))
    }
}

/// 主解析 + 回退解析
pub fn parse_task_specs(text: &str, goal: &str) -> Vec<TaskSpec> {
    parse_or_fallback(text, parse_json_specs, |t| parse_numbered_list(t, goal))
}

/// JSON 主解析：数组逐项解析，单个对象包装为一项；空数组视为失败
pub fn parse_json_specs(text: &str) -> Result<Vec<TaskSpec>, AgentError> {
    let json_str = extract_json(text)
        .ok_or_else(|| AgentError::JsonParseError("no JSON in decomposition output".into()))?;
    let value: Value = serde_json::from_str(json_str)
        .map_err(|e| AgentError::JsonParseError(e.to_string()))?;

    let items = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        _ => {
            return Err(AgentError::JsonParseError(
                "decomposition output is not a task list".into(),
            ))
        }
    };
    if items.is_empty() {
        return Err(AgentError::JsonParseError("empty task list".into()));
    }

    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item).map_err(|e| AgentError::JsonParseError(e.to_string()))
        })
        .collect()
}

/// 编号列表回退解析：`1. ...` / `1) ...` 开始新任务，`key: value` 行补充字段，空行结束当前任务
pub fn parse_numbered_list(text: &str, goal: &str) -> Vec<TaskSpec> {
    let mut specs = Vec::new();
    let mut current: Option<TaskSpec> = None;

    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            specs.extend(current.take());
            continue;
        }

        if let Some(description) = numbered_item(line) {
            specs.extend(current.take());
            let mut spec = TaskSpec::new(description);
            spec.task_type = "research".to_string();
            current = Some(spec);
            continue;
        }

        if let (Some(spec), Some((key, value))) = (current.as_mut(), line.split_once(':')) {
            let value = value.trim().to_string();
            match key.trim().to_lowercase().as_str() {
                "description" => spec.description = value,
                "task_type" => spec.task_type = value,
                "agent_role" => spec.agent_role = value,
                _ => {}
            }
        }
    }
    specs.extend(current);

    if specs.is_empty() {
        let mut spec = TaskSpec::new(format!("Research and analyze: {}", goal));
        spec.task_type = "research".to_string();
        spec.input_data.insert("query".into(), Value::from(goal));
        specs.push(spec);
    }
    specs
}

static NUMBERED_ITEM_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// 行首 1-3 位数字后接 `. ` 或 `) `
fn numbered_item(line: &str) -> Option<&str> {
    let re = NUMBERED_ITEM_RE
        .get_or_init(|| Regex::new(r"^\d{1,3}[.)]\s+(.+)$").ok())
        .as_ref()?;
    re.captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|d| !d.is_empty())
}

/// 为任务规格分配 id 并解析依赖；无法解析或指向自身及之后任务的引用被丢弃
pub fn build_task_nodes(specs: &[TaskSpec]) -> Vec<TaskNode> {
    let ids: Vec<String> = (0..specs.len())
        .map(|i| format!("task_{}_{}", i + 1, short_hex(8)))
        .collect();

    specs
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            let mut dependencies: Vec<String> = Vec::new();
            for dep in &spec.dependencies {
                match resolve_dependency(dep, &specs[..i]) {
                    Some(j) => {
                        if !dependencies.contains(&ids[j]) {
                            dependencies.push(ids[j].clone());
                        }
                    }
                    None => tracing::debug!(task = %ids[i], ?dep, "dropping unresolved dependency"),
                }
            }

            let description = if spec.description.trim().is_empty() {
                format!("Task {}", i + 1)
            } else {
                spec.description.clone()
            };

            TaskNode::new(ids[i].clone(), description, CapabilityRole::from_label(&spec.agent_role))
                .with_task_type(spec.task_type.clone())
                .with_dependencies(dependencies)
                .with_input(spec.input_data.clone())
        })
        .collect()
}

fn resolve_dependency(dep: &DependencyRef, earlier: &[TaskSpec]) -> Option<usize> {
    match dep {
        DependencyRef::Index(j) => (*j < earlier.len()).then_some(*j),
        DependencyRef::Description(text) => match text.trim().parse::<usize>() {
            Ok(j) => (j < earlier.len()).then_some(j),
            Err(_) => earlier.iter().position(|s| s.description == *text),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    #[test]
    fn test_json_in_fence() {
        let text = "Sure!\n```json\n[{\"description\": \"a\", \"agent_role\": \"evaluator\"}]\n```";
        let specs = parse_task_specs(text, "goal");
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].agent_role, "evaluator");
    }

    #[test]
    fn test_single_object_is_wrapped() {
        let specs = parse_json_specs(r#"{"description": "only one"}"#).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].description, "only one");
    }

    #[test]
    fn test_numbered_list_fallback() {
        let text = "Plan:\n1. Survey developer forums\nagent_role: researcher\n\n2) Score the ideas\nagent_role: evaluator\ntask_type: evaluation\n";
        let specs = parse_task_specs(text, "goal");
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].description, "Survey developer forums");
        assert_eq!(specs[0].task_type, "research");
        assert_eq!(specs[1].description, "Score the ideas");
        assert_eq!(specs[1].agent_role, "evaluator");
        assert_eq!(specs[1].task_type, "evaluation");
    }

    #[test]
    fn test_unparseable_output_yields_research_task() {
        let specs = parse_task_specs("I cannot help with that.", "find SaaS gaps");
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].description, "Research and analyze: find SaaS gaps");
        assert_eq!(specs[0].input_data["query"], "find SaaS gaps");
    }

    #[test]
    fn test_build_resolves_indices_and_descriptions() {
        let mut a = TaskSpec::new("Research");
        a.dependencies = vec![DependencyRef::Index(0)];
        let mut b = TaskSpec::new("Analyze");
        b.dependencies = vec![DependencyRef::Index(0), DependencyRef::Index(5)];
        let mut c = TaskSpec::new("Report");
        c.agent_role = "wizard".into();
        c.dependencies = vec![
            DependencyRef::Description("Analyze".into()),
            DependencyRef::Description("Research".into()),
            DependencyRef::Description("Nonexistent".into()),
            DependencyRef::Description("0".into()),
        ];

        let nodes = build_task_nodes(&[a, b, c]);
        assert!(nodes[0].id.starts_with("task_1_"));
        assert_eq!(nodes[0].id.len(), "task_1_".len() + 8);
        assert!(nodes[0].dependencies.is_empty());
        assert_eq!(nodes[1].dependencies, vec![nodes[0].id.clone()]);
        assert_eq!(
            nodes[2].dependencies,
            vec![nodes[1].id.clone(), nodes[0].id.clone()]
        );
        assert_eq!(nodes[2].role, CapabilityRole::Researcher);
    }

    #[tokio::test]
    async fn test_llm_decomposer_includes_context() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![r#"[{"description": "x"}]"#]));
        let decomposer = LlmGoalDecomposer::new(llm.clone());
        let mut ctx = Map::new();
        ctx.insert("hint".into(), Value::from("prior lesson"));

        let specs = decomposer.decompose("goal", Some(&ctx)).await.unwrap();
        assert_eq!(specs.len(), 1);
        let request = &llm.requests()[0];
        assert!(request.last_user().unwrap_or("").contains("prior lesson"));
        assert!(request.system().unwrap_or("").contains("breaking down"));
    }
}
