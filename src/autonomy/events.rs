//! 自主循环的过程事件

use serde::Serialize;

use crate::autonomy::types::TerminationReason;

/// 循环进度事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// 第几轮开始（从 1 开始）
    IterationStarted { iteration: u32, max_iterations: u32 },
    /// 计划已生成或已细化
    PlanReady {
        iteration: u32,
        plan_id: String,
        version: u32,
        tasks: usize,
    },
    ExecutionDone {
        iteration: u32,
        completed: usize,
        failed: usize,
        elapsed_ms: u64,
    },
    Critiqued {
        iteration: u32,
        overall_score: f64,
        should_iterate: bool,
    },
    Terminated {
        reason: TerminationReason,
        total_iterations: u32,
    },
}
