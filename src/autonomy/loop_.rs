//! 自主循环：规划 → 执行 → 评审 → 反思 → 决策
//!
//! 迭代之间严格串行（细化依赖上一轮评审）。每轮规划前检查墙钟截止时间；进行中的外部调用用
//! `timeout_at` 包住，截止即放弃。迭代数、成本、token 三项预算只在迭代边界检查。
//! 任何错误或 panic 都在 `run` 边界转为 Failed 结果，原因为 `error:<message>`。

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use serde_json::{Map, Value};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;

use crate::autonomy::critic::Critic;
use crate::autonomy::events::LoopEvent;
use crate::autonomy::reflection::Reflection;
use crate::autonomy::types::{
    AutonomousExecutionResult, ExecutionStatus, IterationResult, TerminationReason,
};
use crate::config::{AppConfig, AutonomySection};
use crate::core::{timestamped_id, AgentError, TaskScheduler};
use crate::execution::dispatcher::panic_message;
use crate::execution::{Dispatcher, WorkerRegistry};
use crate::llm::{EmbeddingProvider, LlmClient};
use crate::memory::{Experience, ExperienceLog, MemoryStore, MemoryType};
use crate::planning::{Plan, PlanningEngine};

/// 一次运行中跨阶段累积的状态；出错或 panic 时据此组装部分结果
#[derive(Default)]
struct RunState {
    iterations: Vec<IterationResult>,
    last_plan: Option<Plan>,
    final_result: Option<Value>,
    last_lessons: Vec<String>,
    total_tokens: u64,
    total_cost: f64,
}

pub struct AutonomousLoop {
    config: AutonomySection,
    planner: PlanningEngine,
    dispatcher: Dispatcher,
    critic: Critic,
    reflection: Reflection,
    memory: Arc<MemoryStore>,
    experience_log: ExperienceLog,
    usage_source: Option<Arc<dyn LlmClient>>,
    events: Option<UnboundedSender<LoopEvent>>,
}

impl AutonomousLoop {
    pub fn new(
        config: AutonomySection,
        planner: PlanningEngine,
        dispatcher: Dispatcher,
        critic: Critic,
        memory: Arc<MemoryStore>,
        experience_log: ExperienceLog,
    ) -> Self {
        Self {
            config,
            planner,
            dispatcher,
            critic,
            reflection: Reflection::new(memory.clone()),
            memory,
            experience_log,
            usage_source: None,
            events: None,
        }
    }

    /// 按配置组装全部组件：规划与评审共用同一 LLM 客户端，并以它作为 token 计量来源
    ///
    /// 长期记忆从 `app.data_dir` 下的快照恢复，快照损坏时返回错误。
    pub fn from_config(
        config: &AppConfig,
        llm: Arc<dyn LlmClient>,
        embedder: Arc<dyn EmbeddingProvider>,
        registry: WorkerRegistry,
    ) -> Result<Self, AgentError> {
        let memory = Arc::new(MemoryStore::from_config(config, embedder)?);
        let planner = PlanningEngine::with_llm(llm.clone(), config.llm.temperature);
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            TaskScheduler::new(config.autonomy.max_parallel_tasks),
        );
        let critic = Critic::new(llm.clone(), config.llm.critic_temperature);
        let experience_log = ExperienceLog::new(&config.memory.experience_log_dir);

        Ok(Self::new(
            config.autonomy.clone(),
            planner,
            dispatcher,
            critic,
            memory,
            experience_log,
        )
        .with_usage_source(llm))
    }

    /// token 用量取自该客户端的累计计数（按运行前后差值计算）
    pub fn with_usage_source(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.usage_source = Some(llm);
        self
    }

    pub fn with_event_sender(mut self, tx: UnboundedSender<LoopEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub fn config(&self) -> &AutonomySection {
        &self.config
    }

    fn emit(&self, event: LoopEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn tokens_now(&self) -> u64 {
        self.usage_source
            .as_ref()
            .map(|llm| llm.token_usage().2)
            .unwrap_or(0)
    }

    /// 运行直到满足某个终止条件；从不返回错误
    pub async fn run(
        &self,
        goal: &str,
        initial_context: Option<Map<String, Value>>,
    ) -> AutonomousExecutionResult {
        let execution_id = timestamped_id("exec");
        let started = Instant::now();
        // 超出 Instant 可表示范围的超时视为无截止时间，墙钟检查仍按秒数比较
        let deadline = self
            .config
            .timeout_seconds
            .and_then(|secs| started.checked_add(Duration::from_secs(secs)));
        let tokens_at_start = self.tokens_now();
        let mut state = RunState::default();

        tracing::info!(%execution_id, goal, "autonomous run started");

        let driven = AssertUnwindSafe(self.drive(
            goal,
            initial_context.unwrap_or_default(),
            &execution_id,
            started,
            deadline,
            tokens_at_start,
            &mut state,
        ))
        .catch_unwind()
        .await;

        let termination_reason = match driven {
            Ok(Ok(reason)) => reason,
            Ok(Err(e)) => {
                tracing::error!(%execution_id, error = %e, "autonomous run failed");
                TerminationReason::Error(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(%execution_id, error = %message, "autonomous run panicked");
                TerminationReason::Error(message)
            }
        };

        let status = match termination_reason {
            TerminationReason::PlanningFailed | TerminationReason::Error(_) => ExecutionStatus::Failed,
            _ if state.final_result.is_some() => ExecutionStatus::Completed,
            _ => ExecutionStatus::Failed,
        };

        let result = AutonomousExecutionResult {
            execution_id: execution_id.clone(),
            goal: goal.to_string(),
            total_iterations: state.iterations.len() as u32,
            iterations: std::mem::take(&mut state.iterations),
            final_result: state.final_result.take(),
            total_time_secs: started.elapsed().as_secs_f64(),
            total_cost: state.total_cost,
            total_tokens: state.total_tokens,
            status,
            termination_reason,
        };

        if let Err(e) = self.experience_log.log_execution(&result).await {
            tracing::warn!(error = %e, "failed to write execution log");
        }
        self.store_final_experience(&result, state.last_plan.take(), std::mem::take(&mut state.last_lessons))
            .await;

        tracing::info!(
            %execution_id,
            iterations = result.total_iterations,
            status = %result.status,
            termination = %result.termination_reason,
            "autonomous run finished"
        );
        self.emit(LoopEvent::Terminated {
            reason: result.termination_reason.clone(),
            total_iterations: result.total_iterations,
        });
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        goal: &str,
        mut context: Map<String, Value>,
        execution_id: &str,
        started: Instant,
        deadline: Option<Instant>,
        tokens_at_start: u64,
        state: &mut RunState,
    ) -> Result<TerminationReason, AgentError> {
        let mut meta = Map::new();
        meta.insert("execution_id".into(), Value::from(execution_id));
        self.memory
            .remember(format!("Goal: {}", goal), MemoryType::Action, Some(meta))
            .await;

        let retrieved = within(
            deadline,
            self.memory
                .long_term()
                .retrieve_relevant_memory(goal, None, self.config.memory_top_k),
        )
        .await;
        match retrieved {
            Some(Ok(past)) if !past.is_empty() => {
                context.insert("past_experiences".into(), Value::from(past));
            }
            Some(Ok(_)) | None => {}
            Some(Err(e)) => tracing::warn!(error = %e, "failed to retrieve past experiences"),
        }

        let max_iterations = self.config.max_iterations;
        for iteration in 1..=max_iterations {
            if let Some(timeout) = self.config.timeout_seconds {
                if started.elapsed() >= Duration::from_secs(timeout) {
                    tracing::info!(iteration, "deadline reached before planning");
                    return Ok(TerminationReason::Timeout);
                }
            }
            tracing::info!(iteration, max_iterations, "iteration started");
            self.emit(LoopEvent::IterationStarted {
                iteration,
                max_iterations,
            });

            // 规划
            let planned = match (state.last_plan.as_ref(), state.iterations.last()) {
                (Some(previous), Some(last)) => {
                    within(
                        deadline,
                        self.planner.refine(previous, &last.critique, Some(&context)),
                    )
                    .await
                }
                _ => within(deadline, self.planner.create(goal, Some(&context))).await,
            };
            let mut plan = match planned {
                None => return Ok(TerminationReason::Timeout),
                Some(Ok(plan)) => plan,
                Some(Err(e)) => {
                    tracing::warn!(iteration, error = %e, "planning failed");
                    return Ok(TerminationReason::PlanningFailed);
                }
            };
            let note = if plan.version == 1 {
                (format!("Created plan with {} tasks", plan.tasks.len()), MemoryType::Action)
            } else {
                (format!("Refined plan (v{})", plan.version), MemoryType::Reasoning)
            };
            self.memory.remember(note.0, note.1, None).await;
            self.emit(LoopEvent::PlanReady {
                iteration,
                plan_id: plan.id.clone(),
                version: plan.version,
                tasks: plan.tasks.len(),
            });

            // 执行
            let exec_started = Instant::now();
            let execution = match within(deadline, self.dispatcher.run(&mut plan)).await {
                None => {
                    state.last_plan = Some(plan);
                    return Ok(TerminationReason::Timeout);
                }
                Some(result) => result?,
            };
            let exec_elapsed = exec_started.elapsed();
            state.final_result = execution.final_result.clone();
            self.memory
                .remember(
                    format!("Execution completed: {} tasks", execution.completed_tasks),
                    MemoryType::Result,
                    None,
                )
                .await;
            self.emit(LoopEvent::ExecutionDone {
                iteration,
                completed: execution.completed_tasks,
                failed: execution.failed_tasks,
                elapsed_ms: exec_elapsed.as_millis() as u64,
            });

            // 评审：没有任何完成节点时把整份执行汇总交给评审
            let critic_input = match &execution.final_result {
                Some(value) => value.clone(),
                None => serde_json::to_value(&execution)?,
            };
            let mut critic_context = Map::new();
            critic_context.insert(
                "recent_activity".into(),
                Value::from(self.memory.short_term_context().await),
            );
            let critique = match within(
                deadline,
                self.critic.evaluate(&critic_input, goal, Some(&critic_context)),
            )
            .await
            {
                None => {
                    state.last_plan = Some(plan);
                    return Ok(TerminationReason::Timeout);
                }
                Some(critique) => critique?,
            };
            self.emit(LoopEvent::Critiqued {
                iteration,
                overall_score: critique.overall_score,
                should_iterate: critique.should_iterate,
            });

            // 反思
            match within(
                deadline,
                self.reflection
                    .reflect(goal, &plan, &critic_input, &critique, exec_elapsed),
            )
            .await
            {
                Some(Ok(outcome)) => state.last_lessons = outcome.lessons,
                Some(Err(e)) => tracing::warn!(iteration, error = %e, "reflection failed"),
                None => tracing::debug!(iteration, "reflection abandoned at deadline"),
            }

            // 用量
            let tokens_before = state.total_tokens;
            state.total_tokens = self.tokens_now().saturating_sub(tokens_at_start);
            state.total_cost = state.total_tokens as f64 / 1000.0 * self.config.cost_per_1k_tokens;
            let iteration_tokens = state.total_tokens - tokens_before;

            let record = IterationResult {
                iteration,
                plan: plan.clone(),
                execution,
                critique: critique.clone(),
                execution_time_secs: exec_elapsed.as_secs_f64(),
                tokens_used: Some(iteration_tokens),
                cost: Some(iteration_tokens as f64 / 1000.0 * self.config.cost_per_1k_tokens),
                timestamp: Utc::now(),
            };
            if let Err(e) = self.experience_log.log_iteration(execution_id, &record).await {
                tracing::warn!(iteration, error = %e, "failed to write iteration log");
            }
            state.iterations.push(record);
            state.last_plan = Some(plan);

            tracing::info!(
                iteration,
                overall = critique.overall_score,
                should_iterate = critique.should_iterate,
                tokens = state.total_tokens,
                "iteration finished"
            );

            // 决策：threshold_met → max_cost → max_tokens → max_iterations
            if critique.overall_score >= self.config.score_threshold && !critique.should_iterate {
                return Ok(TerminationReason::ThresholdMet);
            }
            if self
                .config
                .max_cost
                .is_some_and(|limit| state.total_cost >= limit)
            {
                return Ok(TerminationReason::MaxCost);
            }
            if self
                .config
                .max_tokens
                .is_some_and(|limit| state.total_tokens >= limit)
            {
                return Ok(TerminationReason::MaxTokens);
            }
            if iteration >= max_iterations {
                break;
            }
        }
        Ok(TerminationReason::MaxIterations)
    }

    /// 运行结束后写一条汇总经验，失败只记日志
    async fn store_final_experience(
        &self,
        result: &AutonomousExecutionResult,
        plan: Option<Plan>,
        lessons: Vec<String>,
    ) {
        let mut experience = Experience::new(
            result.goal.clone(),
            result.final_result.clone().unwrap_or(Value::Null),
        )
        .with_success(result.status == ExecutionStatus::Completed)
        .with_lessons(lessons)
        .with_metadata("execution_id", result.execution_id.clone())
        .with_metadata("total_iterations", result.total_iterations.to_string())
        .with_metadata("termination_reason", result.termination_reason.to_string());
        if let Some(plan) = plan {
            experience = experience.with_plan(plan);
        }
        if let Some(last) = result.iterations.last() {
            let c = &last.critique;
            experience = experience
                .with_metadata("completeness", format!("{:.3}", c.completeness_score))
                .with_metadata("evidence", format!("{:.3}", c.evidence_strength_score))
                .with_metadata("coherence", format!("{:.3}", c.coherence_score))
                .with_metadata("actionability", format!("{:.3}", c.actionability_score))
                .with_metadata("overall", format!("{:.3}", c.overall_score));
        }

        if let Err(e) = self.memory.long_term().store_experience(&experience).await {
            tracing::warn!(error = %e, "failed to store final experience");
        }
        if let Err(e) = self.experience_log.log_experience(&experience).await {
            tracing::warn!(error = %e, "failed to write experience log");
        }
    }

    /// 人类可读的运行摘要
    pub fn summary(result: &AutonomousExecutionResult) -> String {
        let mut lines = vec![
            format!("Execution ID: {}", result.execution_id),
            format!("Goal: {}", result.goal),
            format!("Iterations: {}", result.total_iterations),
            format!("Total Time: {:.2}s", result.total_time_secs),
            format!("Status: {}", result.status),
            format!("Termination: {}", result.termination_reason),
        ];
        let scores = result.score_progression();
        if let Some(last) = scores.last() {
            let progression: Vec<String> = scores.iter().map(|s| format!("{:.2}", s)).collect();
            lines.push(format!("Score Progression: {}", progression.join(" → ")));
            lines.push(format!("Final Score: {:.2}/1.0", last));
        }
        lines.join("\n")
    }
}

/// 有截止时间时用 `timeout_at` 包住；超时返回 None，内部 future 被丢弃
async fn within<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut).await.ok(),
        None => Some(fut.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autonomy::Critique;
    use crate::core::short_hex;
    use crate::execution::ExecutionOutcome;

    fn iteration_with_score(n: u32, score: f64) -> IterationResult {
        let plan = Plan::new("goal", vec![]);
        IterationResult {
            iteration: n,
            execution: ExecutionOutcome {
                plan_id: plan.id.clone(),
                goal: plan.goal.clone(),
                execution_log: vec![],
                results: vec![],
                completed_tasks: 0,
                failed_tasks: 0,
                is_complete: true,
                final_result: None,
            },
            plan,
            critique: Critique {
                overall_score: score,
                ..Critique::from_scores(score, score, score, score)
            },
            execution_time_secs: 0.1,
            tokens_used: None,
            cost: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_summary_renders_score_progression() {
        let result = AutonomousExecutionResult {
            execution_id: format!("exec_{}", short_hex(8)),
            goal: "find gaps".into(),
            iterations: vec![
                iteration_with_score(1, 0.5),
                iteration_with_score(2, 0.6),
                iteration_with_score(3, 0.9),
            ],
            final_result: Some(Value::from("done")),
            total_iterations: 3,
            total_time_secs: 1.234,
            total_cost: 0.0,
            total_tokens: 0,
            status: ExecutionStatus::Completed,
            termination_reason: TerminationReason::ThresholdMet,
        };
        let summary = AutonomousLoop::summary(&result);
        assert!(summary.contains("Score Progression: 0.50 → 0.60 → 0.90"));
        assert!(summary.contains("Final Score: 0.90/1.0"));
        assert!(summary.contains("Termination: threshold_met"));
        assert!(summary.contains("Total Time: 1.23s"));
    }

    #[tokio::test]
    async fn test_within_without_deadline_awaits() {
        assert_eq!(within(None, async { 7 }).await, Some(7));
        let past = Instant::now();
        let slow = within(Some(past), tokio::time::sleep(Duration::from_secs(5))).await;
        assert!(slow.is_none());
    }
}
