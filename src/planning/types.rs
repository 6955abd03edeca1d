//! 规划类型定义
//!
//! 任务节点、能力角色、计划，以及分解器输出的任务规格

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::timestamped_id;

pub type TaskId = String;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 等待依赖满足
    Pending,
    /// 已派发给 worker
    InProgress,
    /// 已完成
    Completed,
    /// 失败（含依赖阻塞）
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 能力角色：决定由哪个 worker 执行任务
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CapabilityRole {
    Researcher,
    MarketAnalyst,
    IdeaGenerator,
    Evaluator,
    Custom(String),
}

impl CapabilityRole {
    pub fn as_str(&self) -> &str {
        match self {
            CapabilityRole::Researcher => "researcher",
            CapabilityRole::MarketAnalyst => "market_analyst",
            CapabilityRole::IdeaGenerator => "idea_generator",
            CapabilityRole::Evaluator => "evaluator",
            CapabilityRole::Custom(name) => name,
        }
    }

    fn known(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "researcher" => Some(CapabilityRole::Researcher),
            "market_analyst" => Some(CapabilityRole::MarketAnalyst),
            "idea_generator" => Some(CapabilityRole::IdeaGenerator),
            "evaluator" => Some(CapabilityRole::Evaluator),
            _ => None,
        }
    }

    /// 分解器输出的角色标签：未知标签归为 researcher
    pub fn from_label(label: &str) -> Self {
        Self::known(label).unwrap_or(CapabilityRole::Researcher)
    }

    /// 内置四种角色
    pub fn builtin() -> [CapabilityRole; 4] {
        [
            CapabilityRole::Researcher,
            CapabilityRole::MarketAnalyst,
            CapabilityRole::IdeaGenerator,
            CapabilityRole::Evaluator,
        ]
    }
}

impl From<String> for CapabilityRole {
    fn from(s: String) -> Self {
        Self::known(&s).unwrap_or(CapabilityRole::Custom(s))
    }
}

impl From<&str> for CapabilityRole {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<CapabilityRole> for String {
    fn from(role: CapabilityRole) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for CapabilityRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 计划中的任务节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: TaskId,
    pub description: String,
    pub role: CapabilityRole,
    pub task_type: String,
    pub dependencies: Vec<TaskId>,
    pub input: Map<String, Value>,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl TaskNode {
    pub fn new(id: impl Into<TaskId>, description: impl Into<String>, role: CapabilityRole) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            role,
            task_type: "general".to_string(),
            dependencies: Vec::new(),
            input: Map::new(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
        }
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = task_type.into();
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_input(mut self, input: Map<String, Value>) -> Self {
        self.input = input;
        self
    }
}

/// 版本化的计划：目标 + 任务列表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub goal: String,
    pub tasks: Vec<TaskNode>,
    pub created_at: DateTime<Utc>,
    pub version: u32,
    pub metadata: Map<String, Value>,
}

impl Plan {
    pub fn new(goal: impl Into<String>, tasks: Vec<TaskNode>) -> Self {
        Self {
            id: timestamped_id("plan"),
            goal: goal.into(),
            tasks,
            created_at: Utc::now(),
            version: 1,
            metadata: Map::new(),
        }
    }

    pub fn task_descriptions(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.description.clone()).collect()
    }

    pub fn get_task(&self, id: &str) -> Option<&TaskNode> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

/// 依赖引用：0 起始的位置，或任务描述原文
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyRef {
    Index(usize),
    Description(String),
}

/// 分解器给出的任务规格（尚未分配 id）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_task_type", alias = "type")]
    pub task_type: String,
    #[serde(default)]
    pub dependencies: Vec<DependencyRef>,
    #[serde(default = "default_role", alias = "role")]
    pub agent_role: String,
    #[serde(default, alias = "input")]
    pub input_data: Map<String, Value>,
}

fn default_task_type() -> String {
    "general".to_string()
}

fn default_role() -> String {
    "researcher".to_string()
}

impl TaskSpec {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            task_type: default_task_type(),
            dependencies: Vec::new(),
            agent_role: default_role(),
            input_data: Map::new(),
        }
    }
}
