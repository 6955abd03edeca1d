//! 错误类型与分类
//!
//! 所有组件通过 `Result<_, AgentError>` 返回错误；`ErrorKind` 把错误归入结构性、能力、解析、
//! LLM、I/O 与意外六类，供自主循环决定是局部恢复还是终止本次运行。预算耗尽不是错误，
//! 由自主循环以终止原因表达。

use thiserror::Error;

use crate::llm::LlmError;

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 计划结构错误（环、悬空依赖、重复 ID）：校验时拒绝，不做修复
    Structural,
    /// 没有为能力角色注册 Worker：只影响单个节点
    Capability,
    /// 外部能力输出不合规：总有确定的回退解析
    Parse,
    Llm,
    Io,
    Unexpected,
}

/// 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Cycle detected in task graph involving task: {0}")]
    CyclicDependency(String),

    #[error("Task {task} depends on non-existent task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    #[error("Duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid plan: {}", .0.join("; "))]
    InvalidPlan(Vec<String>),

    #[error("No worker registered for capability role: {0}")]
    UnregisteredCapability(String),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Unexpected(String),
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::CyclicDependency(_)
            | AgentError::UnknownDependency { .. }
            | AgentError::DuplicateTask(_)
            | AgentError::TaskNotFound(_)
            | AgentError::InvalidPlan(_) => ErrorKind::Structural,
            AgentError::UnregisteredCapability(_) => ErrorKind::Capability,
            AgentError::JsonParseError(_) => ErrorKind::Parse,
            AgentError::LlmError(_) => ErrorKind::Llm,
            AgentError::Io(_) | AgentError::Serialization(_) => ErrorKind::Io,
            AgentError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    /// 结构性错误：计划本身有缺陷
    pub fn is_structural(&self) -> bool {
        self.kind() == ErrorKind::Structural
    }
}
