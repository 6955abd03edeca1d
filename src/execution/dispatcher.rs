//! Dispatcher：按层执行计划
//!
//! 层内节点经 JoinSet 并发派发（Semaphore 限流），结果按声明顺序写回任务图；第 L+1 层在第 L 层
//! 全部到达终态后才开始。单个节点失败只影响自身，其下游保持 Pending，在收尾时被标记为 blocked 失败。
//! 调用方丢弃 `run` 的 future（例如超过截止时间）时，JoinSet 随之析构并中止仍在运行的 worker。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinSet;

use crate::core::{AgentError, TaskScheduler};
use crate::execution::worker::{Worker, WorkerRegistry};
use crate::planning::{CapabilityRole, Plan, TaskGraph, TaskId, TaskNode, TaskStatus};

/// 每个被尝试执行的节点一条
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionLogEntry {
    pub task_id: TaskId,
    pub description: String,
    pub role: CapabilityRole,
    pub level: usize,
    pub status: TaskStatus,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// 节点最终状态
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub description: String,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// 一次计划执行的汇总
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub plan_id: String,
    pub goal: String,
    pub execution_log: Vec<ExecutionLogEntry>,
    /// 按声明顺序
    pub results: Vec<TaskResult>,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub is_complete: bool,
    /// 声明顺序中最后一个 Completed 节点的结果
    pub final_result: Option<Value>,
}

impl ExecutionOutcome {
    pub fn final_results(&self) -> Map<String, Value> {
        self.results
            .iter()
            .filter(|r| r.status == TaskStatus::Completed)
            .filter_map(|r| r.result.clone().map(|v| (r.task_id.clone(), v)))
            .collect()
    }
}

type WorkerOutput = (Result<Value, String>, Duration);

pub struct Dispatcher {
    registry: Arc<WorkerRegistry>,
    scheduler: TaskScheduler,
}

impl Dispatcher {
    pub fn new(registry: Arc<WorkerRegistry>, scheduler: TaskScheduler) -> Self {
        Self {
            registry,
            scheduler,
        }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// 执行计划；节点状态写回 `plan.tasks`。结构性错误（环、悬空依赖）直接返回 Err
    pub async fn run(&self, plan: &mut Plan) -> Result<ExecutionOutcome, AgentError> {
        let mut graph = TaskGraph::new(plan.tasks.clone())?;
        let levels = graph.execution_levels();
        let mut execution_log = Vec::new();

        for (level, ids) in levels.iter().enumerate() {
            let mut join_set: JoinSet<(usize, WorkerOutput)> = JoinSet::new();
            let mut dispatched: Vec<TaskNode> = Vec::new();

            for id in ids {
                if !graph.dependencies_completed(id) {
                    tracing::debug!(task_id = %id, level, "dependencies not completed, leaving pending");
                    continue;
                }
                let node = graph
                    .get(id)
                    .cloned()
                    .ok_or_else(|| AgentError::TaskNotFound(id.clone()))?;

                let Some(worker) = self.registry.get(&node.role) else {
                    let error = AgentError::UnregisteredCapability(node.role.to_string()).to_string();
                    tracing::warn!(task_id = %id, role = %node.role, level, "no worker registered");
                    graph.update_status(id, TaskStatus::Failed, None, Some(error.clone()))?;
                    execution_log.push(log_entry(&node, level, TaskStatus::Failed, Some(error), Duration::ZERO));
                    continue;
                };

                graph.update_status(id, TaskStatus::InProgress, None, None)?;
                let task = with_upstream_results(node.clone(), &graph);
                let slot = dispatched.len();
                dispatched.push(node);
                join_set.spawn(run_worker(slot, worker, task, self.scheduler.clone()));
            }

            let mut outputs: Vec<Option<WorkerOutput>> = vec![None; dispatched.len()];
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((slot, output)) => outputs[slot] = Some(output),
                    Err(e) => tracing::error!(error = %e, level, "worker task aborted"),
                }
            }

            for (node, output) in dispatched.iter().zip(outputs) {
                let (status, result, error, elapsed) = match output {
                    Some((Ok(value), elapsed)) => (TaskStatus::Completed, Some(value), None, elapsed),
                    Some((Err(e), elapsed)) => (TaskStatus::Failed, None, Some(e), elapsed),
                    None => (
                        TaskStatus::Failed,
                        None,
                        Some("worker task aborted".to_string()),
                        Duration::ZERO,
                    ),
                };
                tracing::info!(
                    task_id = %node.id,
                    role = %node.role,
                    level,
                    status = %status,
                    duration_ms = elapsed.as_millis() as u64,
                    "task finished"
                );
                graph.update_status(&node.id, status, result, error.clone())?;
                execution_log.push(log_entry(node, level, status, error, elapsed));
            }
        }

        sweep_blocked(&mut graph)?;
        let outcome = summarize(plan, &graph, execution_log);
        plan.tasks = graph.into_nodes();
        Ok(outcome)
    }
}

async fn run_worker(
    slot: usize,
    worker: Arc<dyn Worker>,
    task: TaskNode,
    scheduler: TaskScheduler,
) -> (usize, WorkerOutput) {
    let _permit = match scheduler.acquire().await {
        Ok(permit) => permit,
        Err(e) => return (slot, (Err(e.to_string()), Duration::ZERO)),
    };
    let start = Instant::now();
    let result = match AssertUnwindSafe(worker.execute(&task)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(format!("worker panicked: {}", panic_message(panic.as_ref()))),
    };
    (slot, (result, start.elapsed()))
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// 派发副本的 input 中附上已完成依赖的结果（`upstream_results`），图中保存的 input 不变
fn with_upstream_results(mut task: TaskNode, graph: &TaskGraph) -> TaskNode {
    let upstream: Map<String, Value> = task
        .dependencies
        .iter()
        .filter_map(|dep| graph.get(dep))
        .filter_map(|dep| dep.result.clone().map(|r| (dep.id.clone(), r)))
        .collect();
    if !upstream.is_empty() {
        task.input.insert("upstream_results".into(), Value::Object(upstream));
    }
    task
}

/// 仍为 Pending 的节点都被上游失败阻塞，统一标记为 Failed
fn sweep_blocked(graph: &mut TaskGraph) -> Result<(), AgentError> {
    let blocked: Vec<(TaskId, String)> = graph
        .pending()
        .into_iter()
        .map(|node| {
            let culprit = node
                .dependencies
                .iter()
                .find(|dep| {
                    graph
                        .get(dep)
                        .map_or(true, |d| d.status != TaskStatus::Completed)
                })
                .cloned()
                .unwrap_or_default();
            (node.id.clone(), culprit)
        })
        .collect();

    for (id, culprit) in blocked {
        tracing::info!(task_id = %id, dependency = %culprit, "task blocked by failed dependency");
        graph.update_status(
            &id,
            TaskStatus::Failed,
            None,
            Some(format!("blocked: dependency {} did not complete", culprit)),
        )?;
    }
    Ok(())
}

fn log_entry(
    node: &TaskNode,
    level: usize,
    status: TaskStatus,
    error: Option<String>,
    elapsed: Duration,
) -> ExecutionLogEntry {
    ExecutionLogEntry {
        task_id: node.id.clone(),
        description: node.description.clone(),
        role: node.role.clone(),
        level,
        status,
        error,
        duration_ms: elapsed.as_millis() as u64,
    }
}

fn summarize(plan: &Plan, graph: &TaskGraph, execution_log: Vec<ExecutionLogEntry>) -> ExecutionOutcome {
    let results: Vec<TaskResult> = graph
        .nodes()
        .iter()
        .map(|n| TaskResult {
            task_id: n.id.clone(),
            description: n.description.clone(),
            status: n.status,
            result: n.result.clone(),
            error: n.error.clone(),
        })
        .collect();

    let final_result = graph
        .nodes()
        .iter()
        .rev()
        .find(|n| n.status == TaskStatus::Completed)
        .and_then(|n| n.result.clone());

    ExecutionOutcome {
        plan_id: plan.id.clone(),
        goal: plan.goal.clone(),
        execution_log,
        results,
        completed_tasks: graph.completed().len(),
        failed_tasks: graph.failed().len(),
        is_complete: graph.is_complete(),
        final_result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::worker::FnWorker;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn node(id: &str, role: CapabilityRole, deps: &[&str]) -> TaskNode {
        TaskNode::new(id, format!("do {}", id), role).with_dependencies(deps.iter().copied())
    }

    fn echo_registry() -> WorkerRegistry {
        WorkerRegistry::new()
            .with(
                CapabilityRole::Researcher,
                FnWorker::new("echo", |t| Ok(Value::from(format!("{} done", t.id)))),
            )
            .with(
                CapabilityRole::Evaluator,
                FnWorker::new("fail", |_| Err("evaluation crashed".to_string())),
            )
    }

    fn dispatcher(registry: WorkerRegistry) -> Dispatcher {
        Dispatcher::new(Arc::new(registry), TaskScheduler::new(2))
    }

    #[tokio::test]
    async fn test_runs_levels_and_picks_last_completed() {
        let mut plan = Plan::new(
            "goal",
            vec![
                node("a", CapabilityRole::Researcher, &[]),
                node("b", CapabilityRole::Researcher, &["a"]),
                node("c", CapabilityRole::Researcher, &[]),
            ],
        );
        let outcome = dispatcher(echo_registry()).run(&mut plan).await.unwrap();

        assert!(outcome.is_complete);
        assert_eq!(outcome.completed_tasks, 3);
        assert_eq!(outcome.final_result, Some(Value::from("c done")));
        let levels: Vec<(String, usize)> = outcome
            .execution_log
            .iter()
            .map(|e| (e.task_id.clone(), e.level))
            .collect();
        assert_eq!(
            levels,
            vec![("a".into(), 0), ("c".into(), 0), ("b".into(), 1)]
        );
        assert!(plan.tasks.iter().all(|t| t.status == TaskStatus::Completed));
    }

    #[tokio::test]
    async fn test_failed_dependency_blocks_dependents() {
        let mut plan = Plan::new(
            "goal",
            vec![
                node("a", CapabilityRole::Researcher, &[]),
                node("b", CapabilityRole::Evaluator, &["a"]),
                node("c", CapabilityRole::Researcher, &["b"]),
                node("d", CapabilityRole::Researcher, &["a"]),
            ],
        );
        let outcome = dispatcher(echo_registry()).run(&mut plan).await.unwrap();

        assert!(outcome.is_complete);
        assert_eq!(outcome.completed_tasks, 2);
        assert_eq!(outcome.failed_tasks, 2);

        let c = plan.get_task("c").unwrap();
        assert_eq!(c.status, TaskStatus::Failed);
        assert_eq!(c.error.as_deref(), Some("blocked: dependency b did not complete"));
        // c 从未被派发
        assert!(outcome.execution_log.iter().all(|e| e.task_id != "c"));
        assert_eq!(
            plan.get_task("b").unwrap().error.as_deref(),
            Some("evaluation crashed")
        );
        assert_eq!(outcome.final_result, Some(Value::from("d done")));
    }

    #[tokio::test]
    async fn test_unregistered_role_fails_only_that_node() {
        let mut plan = Plan::new(
            "goal",
            vec![
                node("a", CapabilityRole::MarketAnalyst, &[]),
                node("b", CapabilityRole::Researcher, &[]),
            ],
        );
        let outcome = dispatcher(echo_registry()).run(&mut plan).await.unwrap();

        let a = plan.get_task("a").unwrap();
        assert_eq!(a.status, TaskStatus::Failed);
        assert!(a.error.as_deref().unwrap_or("").contains("market_analyst"));
        assert_eq!(plan.get_task("b").unwrap().status, TaskStatus::Completed);
        assert_eq!(outcome.execution_log.len(), 2);
    }

    #[tokio::test]
    async fn test_upstream_results_reach_dependents() {
        let registry = WorkerRegistry::new().with(
            CapabilityRole::Researcher,
            FnWorker::new("join", |t| {
                let upstream = t
                    .input
                    .get("upstream_results")
                    .and_then(Value::as_object)
                    .map(|m| m.len())
                    .unwrap_or(0);
                Ok(Value::from(upstream as u64))
            }),
        );
        let mut plan = Plan::new(
            "goal",
            vec![
                node("a", CapabilityRole::Researcher, &[]),
                node("b", CapabilityRole::Researcher, &[]),
                node("c", CapabilityRole::Researcher, &["a", "b"]),
            ],
        );
        let outcome = dispatcher(registry).run(&mut plan).await.unwrap();
        assert_eq!(outcome.final_result, Some(Value::from(2u64)));
        assert!(!plan.get_task("c").unwrap().input.contains_key("upstream_results"));
    }

    struct PanickingWorker;

    #[async_trait]
    impl Worker for PanickingWorker {
        fn name(&self) -> &str {
            "panic"
        }

        async fn execute(&self, _task: &TaskNode) -> Result<Value, String> {
            panic!("kaboom")
        }
    }

    #[tokio::test]
    async fn test_worker_panic_marks_node_failed() {
        let registry = WorkerRegistry::new().with(CapabilityRole::Researcher, PanickingWorker);
        let mut plan = Plan::new("goal", vec![node("a", CapabilityRole::Researcher, &[])]);
        let outcome = dispatcher(registry).run(&mut plan).await.unwrap();
        assert_eq!(outcome.failed_tasks, 1);
        assert!(plan.tasks[0].error.as_deref().unwrap_or("").contains("kaboom"));
        assert!(outcome.final_result.is_none());
    }

    struct CountingWorker {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Worker for CountingWorker {
        fn name(&self) -> &str {
            "counting"
        }

        async fn execute(&self, _task: &TaskNode) -> Result<Value, String> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_level_concurrency_is_bounded() {
        let peak = Arc::new(AtomicUsize::new(0));
        let registry = WorkerRegistry::new().with(
            CapabilityRole::Researcher,
            CountingWorker {
                running: Arc::new(AtomicUsize::new(0)),
                peak: peak.clone(),
            },
        );
        let tasks = (0..5)
            .map(|i| node(&format!("t{}", i), CapabilityRole::Researcher, &[]))
            .collect();
        let mut plan = Plan::new("goal", tasks);
        let outcome = dispatcher(registry).run(&mut plan).await.unwrap();

        assert_eq!(outcome.completed_tasks, 5);
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 2, "peak concurrency {}", peak);
    }

    #[tokio::test]
    async fn test_cyclic_plan_is_rejected() {
        let mut plan = Plan::new(
            "goal",
            vec![
                node("a", CapabilityRole::Researcher, &["b"]),
                node("b", CapabilityRole::Researcher, &["a"]),
            ],
        );
        let err = dispatcher(echo_registry()).run(&mut plan).await.unwrap_err();
        assert!(err.is_structural());
    }
}
