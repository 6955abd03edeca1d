//! 规划层：任务节点与计划类型、依赖图、目标分解、规划引擎

pub mod decomposer;
pub mod engine;
pub mod graph;
pub mod types;

pub use decomposer::{build_task_nodes, parse_task_specs, GoalDecomposer, LlmGoalDecomposer};
pub use engine::{refinement_context, validate_plan, PlanningEngine};
pub use graph::TaskGraph;
pub use types::{CapabilityRole, DependencyRef, Plan, TaskId, TaskNode, TaskSpec, TaskStatus};
