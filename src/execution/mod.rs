//! 执行层：Worker 注册表、LLM Worker、按层派发的 Dispatcher

pub mod dispatcher;
pub mod llm_worker;
pub mod worker;

pub use dispatcher::{Dispatcher, ExecutionLogEntry, ExecutionOutcome, TaskResult};
pub use llm_worker::{default_registry, role_system_prompt, LlmWorker};
pub use worker::{FnWorker, Worker, WorkerRegistry};
