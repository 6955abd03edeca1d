//! 自主循环的结果类型：评审、单轮结果、整体运行结果与终止原因

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::execution::ExecutionOutcome;
use crate::planning::Plan;

/// 评审维度权重：完整性、证据、连贯性、可执行性
pub const WEIGHT_COMPLETENESS: f64 = 0.3;
pub const WEIGHT_EVIDENCE: f64 = 0.3;
pub const WEIGHT_COHERENCE: f64 = 0.2;
pub const WEIGHT_ACTIONABILITY: f64 = 0.2;

/// 对一次执行结果的多维评审
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    pub completeness_score: f64,
    pub evidence_strength_score: f64,
    pub coherence_score: f64,
    pub actionability_score: f64,
    pub overall_score: f64,
    pub weaknesses: Vec<String>,
    pub missing_components: Vec<String>,
    pub improvement_suggestions: Vec<String>,
    pub should_iterate: bool,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl Critique {
    pub fn weighted_overall(
        completeness: f64,
        evidence: f64,
        coherence: f64,
        actionability: f64,
    ) -> f64 {
        WEIGHT_COMPLETENESS * completeness
            + WEIGHT_EVIDENCE * evidence
            + WEIGHT_COHERENCE * coherence
            + WEIGHT_ACTIONABILITY * actionability
    }

    /// 由四个维度构造，总分按权重计算
    pub fn from_scores(completeness: f64, evidence: f64, coherence: f64, actionability: f64) -> Self {
        Self {
            completeness_score: completeness,
            evidence_strength_score: evidence,
            coherence_score: coherence,
            actionability_score: actionability,
            overall_score: Self::weighted_overall(completeness, evidence, coherence, actionability),
            weaknesses: Vec::new(),
            missing_components: Vec::new(),
            improvement_suggestions: Vec::new(),
            should_iterate: true,
            confidence: 0.7,
            timestamp: Utc::now(),
        }
    }

    /// 评审输出无法解析时的中性默认值
    pub fn neutral_fallback() -> Self {
        Self {
            overall_score: 0.5,
            weaknesses: vec!["Could not parse evaluation".to_string()],
            improvement_suggestions: vec!["Improve result formatting".to_string()],
            confidence: 0.3,
            ..Self::from_scores(0.5, 0.5, 0.5, 0.5)
        }
    }

    pub fn with_should_iterate(mut self, should_iterate: bool) -> Self {
        self.should_iterate = should_iterate;
        self
    }
}

/// 单轮迭代结果
#[derive(Debug, Clone, Serialize)]
pub struct IterationResult {
    /// 从 1 开始
    pub iteration: u32,
    pub plan: Plan,
    pub execution: ExecutionOutcome,
    pub critique: Critique,
    pub execution_time_secs: f64,
    pub tokens_used: Option<u64>,
    pub cost: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    Failed,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Completed => f.write_str("completed"),
            ExecutionStatus::Failed => f.write_str("failed"),
        }
    }
}

/// 终止原因；同时满足多个条件时按 timeout → planning_failed → threshold_met → max_cost →
/// max_tokens → max_iterations 取第一个
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    ThresholdMet,
    MaxIterations,
    MaxCost,
    MaxTokens,
    Timeout,
    PlanningFailed,
    Error(String),
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::ThresholdMet => f.write_str("threshold_met"),
            TerminationReason::MaxIterations => f.write_str("max_iterations"),
            TerminationReason::MaxCost => f.write_str("max_cost"),
            TerminationReason::MaxTokens => f.write_str("max_tokens"),
            TerminationReason::Timeout => f.write_str("timeout"),
            TerminationReason::PlanningFailed => f.write_str("planning_failed"),
            TerminationReason::Error(msg) => write!(f, "error:{}", msg),
        }
    }
}

impl Serialize for TerminationReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// 一次完整自主运行的结果
#[derive(Debug, Clone, Serialize)]
pub struct AutonomousExecutionResult {
    pub execution_id: String,
    pub goal: String,
    pub iterations: Vec<IterationResult>,
    pub final_result: Option<Value>,
    pub total_iterations: u32,
    pub total_time_secs: f64,
    pub total_cost: f64,
    pub total_tokens: u64,
    pub status: ExecutionStatus,
    pub termination_reason: TerminationReason,
}

impl AutonomousExecutionResult {
    pub fn final_score(&self) -> Option<f64> {
        self.iterations.last().map(|i| i.critique.overall_score)
    }

    pub fn score_progression(&self) -> Vec<f64> {
        self.iterations.iter().map(|i| i.critique.overall_score).collect()
    }
}
