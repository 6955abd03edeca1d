//! 规划引擎：create / refine / validate
//!
//! refine 总是产生新计划（版本 +1，id 追加 `_v{版本}`），原计划保持不变，便于审计与回放。

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::autonomy::Critique;
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::planning::decomposer::{build_task_nodes, GoalDecomposer, LlmGoalDecomposer};
use crate::planning::graph::TaskGraph;
use crate::planning::types::{Plan, TaskNode};

pub struct PlanningEngine {
    decomposer: Arc<dyn GoalDecomposer>,
}

impl PlanningEngine {
    pub fn new(decomposer: Arc<dyn GoalDecomposer>) -> Self {
        Self { decomposer }
    }

    /// 使用 LLM 分解器
    pub fn with_llm(llm: Arc<dyn LlmClient>, temperature: f32) -> Self {
        Self::new(Arc::new(LlmGoalDecomposer::new(llm).with_temperature(temperature)))
    }

    /// 分解目标并构建计划；任务图校验失败时返回 InvalidPlan
    pub async fn create(
        &self,
        goal: &str,
        context: Option<&Map<String, Value>>,
    ) -> Result<Plan, AgentError> {
        let specs = self.decomposer.decompose(goal, context).await?;
        let tasks = build_task_nodes(&specs);

        TaskGraph::new(tasks.clone()).map_err(|e| AgentError::InvalidPlan(vec![e.to_string()]))?;

        let mut plan = Plan::new(goal, tasks);
        if let Some(ctx) = context {
            plan.metadata = ctx.clone();
        }
        tracing::info!(plan_id = %plan.id, tasks = plan.tasks.len(), "plan created");
        Ok(plan)
    }

    /// 依据评审生成新版本计划
    pub async fn refine(
        &self,
        original: &Plan,
        critique: &Critique,
        context: Option<&Map<String, Value>>,
    ) -> Result<Plan, AgentError> {
        let refinement_context = refinement_context(original, critique, context);
        let mut plan = self.create(&original.goal, Some(&refinement_context)).await?;

        plan.version = original.version + 1;
        plan.id = format!("{}_v{}", original.id, plan.version);
        tracing::info!(
            plan_id = %plan.id,
            version = plan.version,
            refined_from = %original.id,
            "plan refined"
        );
        Ok(plan)
    }

    /// 收集全部问题而非遇错即停
    pub fn validate(&self, plan: &Plan) -> (bool, Vec<String>) {
        validate_plan(plan)
    }
}

/// 原计划目标与任务、评审的弱点 / 缺失 / 建议，再并入调用方上下文
pub fn refinement_context(
    original: &Plan,
    critique: &Critique,
    context: Option<&Map<String, Value>>,
) -> Map<String, Value> {
    let mut ctx = Map::new();
    ctx.insert(
        "original_plan".into(),
        json!({
            "goal": original.goal,
            "tasks": original.task_descriptions(),
        }),
    );
    ctx.insert(
        "critique".into(),
        json!({
            "weaknesses": critique.weaknesses,
            "missing_components": critique.missing_components,
            "improvement_suggestions": critique.improvement_suggestions,
        }),
    );
    if let Some(extra) = context {
        ctx.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    ctx
}

pub fn validate_plan(plan: &Plan) -> (bool, Vec<String>) {
    let mut issues = Vec::new();

    if plan.goal.trim().is_empty() {
        issues.push("Plan has no goal".to_string());
    }
    if plan.tasks.is_empty() {
        issues.push("Plan has no tasks".to_string());
    }

    let dangling: Vec<String> = plan
        .tasks
        .iter()
        .flat_map(|task| {
            task.dependencies
                .iter()
                .filter(|dep| plan.get_task(dep).is_none())
                .map(move |dep| format!("Task {} depends on non-existent task {}", task.id, dep))
        })
        .collect();

    // 悬空依赖逐条列出；环检测在剔除悬空边后的子图上进行，两类问题可同时报告
    let graph = if dangling.is_empty() {
        TaskGraph::new(plan.tasks.clone())
    } else {
        TaskGraph::new(without_dangling_edges(plan))
    };
    if let Err(e) = graph {
        issues.push(format!("Task graph validation failed: {}", e));
    }
    issues.extend(dangling);

    (issues.is_empty(), issues)
}

fn without_dangling_edges(plan: &Plan) -> Vec<TaskNode> {
    plan.tasks
        .iter()
        .map(|task| {
            let mut task = task.clone();
            task.dependencies.retain(|dep| plan.get_task(dep).is_some());
            task
        })
        .collect()
}
