//! 自主循环集成测试：脚本化 LLM + 进程内 Worker 驱动完整闭环

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;

use hive::autonomy::{
    AutonomousLoop, Critic, ExecutionStatus, LoopEvent, TerminationReason,
};
use hive::config::AutonomySection;
use hive::core::{AgentError, TaskScheduler};
use hive::execution::{Dispatcher, FnWorker, Worker, WorkerRegistry};
use hive::llm::{HashingEmbedder, LlmError, ScriptedLlmClient};
use hive::memory::{ExperienceLog, InMemoryVectorStore, LongTermMemory, MemoryStore, ShortTermMemory};
use hive::planning::{
    CapabilityRole, GoalDecomposer, PlanningEngine, TaskNode, TaskSpec, TaskStatus,
};

const LINEAR_PLAN: &str = r#"[
    {"description": "Collect forum threads", "task_type": "research", "dependencies": [], "agent_role": "researcher"},
    {"description": "Rank pain points", "task_type": "analysis", "dependencies": [0], "agent_role": "market_analyst"}
]"#;

const BLOCKING_PLAN: &str = r#"[
    {"description": "Collect forum threads", "dependencies": [], "agent_role": "researcher"},
    {"description": "Score opportunities", "dependencies": [0], "agent_role": "evaluator"},
    {"description": "Write the report", "dependencies": [1], "agent_role": "researcher"}
]"#;

fn critique_json(score: f64, should_iterate: bool) -> String {
    format!(
        r#"{{"overall_score": {}, "should_iterate": {}, "weaknesses": ["thin evidence"]}}"#,
        score, should_iterate
    )
}

fn registry() -> WorkerRegistry {
    WorkerRegistry::new()
        .with(
            CapabilityRole::Researcher,
            FnWorker::new("research", |t| Ok(Value::from(format!("notes for {}", t.description)))),
        )
        .with(
            CapabilityRole::MarketAnalyst,
            FnWorker::new("analyst", |_| Ok(Value::from("ranked: onboarding, billing"))),
        )
        .with(
            CapabilityRole::Evaluator,
            FnWorker::new("evaluator", |_| Err("scoring model unavailable".to_string())),
        )
}

struct Harness {
    planner_llm: Arc<ScriptedLlmClient>,
    critic_llm: Arc<ScriptedLlmClient>,
    memory: Arc<MemoryStore>,
    log_dir: TempDir,
}

impl Harness {
    fn new(plan: &str, critiques: Vec<String>) -> Self {
        Self::with_planner(
            Arc::new(ScriptedLlmClient::new(vec![plan])),
            critiques,
        )
    }

    fn with_planner(planner_llm: Arc<ScriptedLlmClient>, critiques: Vec<String>) -> Self {
        let memory = Arc::new(MemoryStore::new(
            ShortTermMemory::new(50),
            LongTermMemory::new(
                Arc::new(InMemoryVectorStore::new("test_memory")),
                Arc::new(HashingEmbedder::default()),
            ),
            1000,
        ));
        Self {
            planner_llm,
            critic_llm: Arc::new(ScriptedLlmClient::new(critiques)),
            memory,
            log_dir: tempfile::tempdir().unwrap(),
        }
    }

    fn build(&self, config: AutonomySection) -> AutonomousLoop {
        self.build_with(config, PlanningEngine::with_llm(self.planner_llm.clone(), 0.7), registry())
    }

    fn build_with(
        &self,
        config: AutonomySection,
        planner: PlanningEngine,
        registry: WorkerRegistry,
    ) -> AutonomousLoop {
        AutonomousLoop::new(
            config,
            planner,
            Dispatcher::new(Arc::new(registry), TaskScheduler::new(2)),
            Critic::new(self.critic_llm.clone(), 0.3),
            self.memory.clone(),
            ExperienceLog::new(self.log_dir.path()),
        )
    }

    fn log_files(&self, prefix: &str) -> usize {
        std::fs::read_dir(self.log_dir.path())
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter(|e| e.file_name().to_string_lossy().starts_with(prefix))
                    .count()
            })
            .unwrap_or(0)
    }
}

fn config(max_iterations: u32, threshold: f64) -> AutonomySection {
    AutonomySection {
        max_iterations,
        score_threshold: threshold,
        ..AutonomySection::default()
    }
}

#[tokio::test]
async fn test_stops_when_threshold_met_on_third_iteration() {
    let harness = Harness::new(
        LINEAR_PLAN,
        vec![
            critique_json(0.5, true),
            critique_json(0.6, true),
            critique_json(0.9, false),
        ],
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    let agent = harness.build(config(3, 0.75)).with_event_sender(tx);

    let result = agent.run("find developer-tool gaps", None).await;

    assert_eq!(result.termination_reason, TerminationReason::ThresholdMet);
    assert_eq!(result.total_iterations, 3);
    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.score_progression(), vec![0.5, 0.6, 0.9]);
    assert_eq!(
        result.final_result,
        Some(Value::from("ranked: onboarding, billing"))
    );

    let versions: Vec<u32> = result.iterations.iter().map(|i| i.plan.version).collect();
    assert_eq!(versions, vec![1, 2, 3]);
    let first_id = &result.iterations[0].plan.id;
    assert_eq!(result.iterations[1].plan.id, format!("{}_v2", first_id));
    assert!(result.iterations[2].plan.id.ends_with("_v3"));

    // 第二轮规划带上了上一轮评审的弱点
    let refine_prompt = harness.planner_llm.requests()[1]
        .last_user()
        .unwrap_or("")
        .to_string();
    assert!(refine_prompt.contains("thin evidence"));

    // 三次反思 + 一条运行汇总经验
    assert_eq!(harness.memory.long_term().len().await, 4);
    assert_eq!(harness.log_files("iteration_"), 3);
    assert_eq!(harness.log_files("execution_"), 1);
    assert_eq!(harness.log_files("experience_"), 1);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(
        events.first(),
        Some(LoopEvent::IterationStarted { iteration: 1, .. })
    ));
    assert!(matches!(
        events.last(),
        Some(LoopEvent::Terminated {
            reason: TerminationReason::ThresholdMet,
            total_iterations: 3
        })
    ));
}

#[tokio::test]
async fn test_exhausts_iterations_without_stop_signal() {
    let harness = Harness::new(LINEAR_PLAN, vec![critique_json(0.9, true)]);
    let result = harness.build(config(2, 0.75)).run("goal", None).await;

    assert_eq!(result.termination_reason, TerminationReason::MaxIterations);
    assert_eq!(result.total_iterations, 2);
    assert_eq!(result.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_zero_timeout_stops_before_planning() {
    let harness = Harness::new(LINEAR_PLAN, vec![critique_json(0.9, false)]);
    let agent = harness.build(AutonomySection {
        timeout_seconds: Some(0),
        ..config(3, 0.75)
    });

    let result = agent.run("goal", None).await;

    assert_eq!(result.termination_reason, TerminationReason::Timeout);
    assert_eq!(result.total_iterations, 0);
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(harness.planner_llm.call_count(), 0);
    assert_eq!(harness.critic_llm.call_count(), 0);
}

#[tokio::test]
async fn test_unrepresentable_timeout_runs_without_deadline() {
    let harness = Harness::new(LINEAR_PLAN, vec![critique_json(0.9, false)]);
    let agent = harness.build(AutonomySection {
        timeout_seconds: Some(u64::MAX),
        ..config(3, 0.75)
    });

    let result = agent.run("goal", None).await;

    assert_eq!(result.termination_reason, TerminationReason::ThresholdMet);
    assert_eq!(result.total_iterations, 1);
    assert_eq!(result.status, ExecutionStatus::Completed);
}

struct StallingWorker;

#[async_trait]
impl Worker for StallingWorker {
    fn name(&self) -> &str {
        "stall"
    }

    async fn execute(&self, _task: &TaskNode) -> Result<Value, String> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn test_deadline_abandons_in_flight_workers() {
    let harness = Harness::new(LINEAR_PLAN, vec![critique_json(0.9, false)]);
    let registry = WorkerRegistry::new().with(CapabilityRole::Researcher, StallingWorker);
    let agent = harness.build_with(
        AutonomySection {
            timeout_seconds: Some(1),
            ..config(3, 0.75)
        },
        PlanningEngine::with_llm(harness.planner_llm.clone(), 0.7),
        registry,
    );

    let started = Instant::now();
    let result = agent.run("goal", None).await;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(result.termination_reason, TerminationReason::Timeout);
    assert_eq!(result.total_iterations, 0);
    assert_eq!(harness.critic_llm.call_count(), 0);
}

#[tokio::test]
async fn test_failed_node_blocks_dependents_but_run_continues() {
    let harness = Harness::new(BLOCKING_PLAN, vec![critique_json(0.4, true)]);
    let result = harness.build(config(1, 0.75)).run("goal", None).await;

    assert_eq!(result.termination_reason, TerminationReason::MaxIterations);
    let execution = &result.iterations[0].execution;
    assert!(execution.is_complete);
    assert_eq!(execution.completed_tasks, 1);
    assert_eq!(execution.failed_tasks, 2);

    let statuses: Vec<TaskStatus> = execution.results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Failed]
    );
    assert_eq!(
        execution.results[1].error.as_deref(),
        Some("scoring model unavailable")
    );
    let blocked = execution.results[2].error.as_deref().unwrap_or("");
    assert!(blocked.starts_with("blocked: dependency task_2_"));
    // 被阻塞的节点从未派发
    assert_eq!(execution.execution_log.len(), 2);

    assert_eq!(
        result.final_result,
        Some(Value::from("notes for Collect forum threads"))
    );
}

#[tokio::test]
async fn test_cost_guard_wins_over_token_guard() {
    let harness = Harness::new(LINEAR_PLAN, vec![critique_json(0.5, true)]);
    let planner_llm = harness.planner_llm.clone();

    let tokens_only = harness
        .build(AutonomySection {
            max_tokens: Some(1),
            ..config(5, 0.75)
        })
        .with_usage_source(planner_llm.clone());
    let result = tokens_only.run("goal", None).await;
    assert_eq!(result.termination_reason, TerminationReason::MaxTokens);
    assert_eq!(result.total_iterations, 1);
    assert!(result.total_tokens > 0);
    assert_eq!(result.iterations[0].tokens_used, Some(result.total_tokens));

    let both = harness
        .build(AutonomySection {
            max_tokens: Some(1),
            max_cost: Some(0.0),
            ..config(5, 0.75)
        })
        .with_usage_source(planner_llm);
    let result = both.run("goal", None).await;
    assert_eq!(result.termination_reason, TerminationReason::MaxCost);
    assert_eq!(result.total_iterations, 1);
}

#[tokio::test]
async fn test_planning_failure_is_typed_termination() {
    let planner = Arc::new(ScriptedLlmClient::from_results(vec![Err(LlmError::ApiError(
        "model overloaded".into(),
    ))]));
    let harness = Harness::with_planner(planner, vec![critique_json(0.9, false)]);

    let result = harness.build(config(3, 0.75)).run("goal", None).await;

    assert_eq!(result.termination_reason, TerminationReason::PlanningFailed);
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.total_iterations, 0);
    assert_eq!(harness.log_files("execution_"), 1);
}

#[tokio::test]
async fn test_critic_failure_becomes_error_reason() {
    let mut harness = Harness::new(LINEAR_PLAN, vec![]);
    harness.critic_llm = Arc::new(ScriptedLlmClient::from_results(vec![Err(
        LlmError::RetriesExhausted {
            attempts: 3,
            last: "upstream 503".into(),
        },
    )]));

    let result = harness.build(config(3, 0.75)).run("goal", None).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    let reason = result.termination_reason.to_string();
    assert!(reason.starts_with("error:"), "{}", reason);
    assert!(reason.contains("upstream 503"));
}

struct PanickingDecomposer;

#[async_trait]
impl GoalDecomposer for PanickingDecomposer {
    async fn decompose(
        &self,
        _goal: &str,
        _context: Option<&Map<String, Value>>,
    ) -> Result<Vec<TaskSpec>, AgentError> {
        panic!("decomposer exploded")
    }
}

#[tokio::test]
async fn test_panic_is_caught_at_loop_boundary() {
    let harness = Harness::new(LINEAR_PLAN, vec![]);
    let agent = harness.build_with(
        config(3, 0.75),
        PlanningEngine::new(Arc::new(PanickingDecomposer)),
        registry(),
    );

    let result = agent.run("goal", None).await;

    assert_eq!(
        result.termination_reason,
        TerminationReason::Error("decomposer exploded".into())
    );
    assert_eq!(result.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn test_past_experiences_feed_next_run() {
    let harness = Harness::new(LINEAR_PLAN, vec![critique_json(0.9, false)]);
    let agent = harness.build(config(1, 0.75));
    agent.run("find developer-tool gaps", None).await;

    let second = agent.run("find developer-tool gaps", None).await;
    assert_eq!(second.termination_reason, TerminationReason::ThresholdMet);

    let requests = harness.planner_llm.requests();
    let prompt = requests.last().and_then(|r| r.last_user()).unwrap_or("");
    assert!(prompt.contains("Relevant past experiences"));
}
