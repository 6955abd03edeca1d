//! Hive - Rust 自主多智能体系统
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、任务调度（层内并发限制）、id 生成
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）、重试、缓存、嵌入
//! - **planning**: 任务图、目标分解、计划创建 / 细化 / 校验
//! - **execution**: Worker 注册表与按层派发的 Dispatcher
//! - **autonomy**: Critic、反思与自主循环
//! - **memory**: 短期环形缓冲、长期经验库与经验日志
//! - **observability**: 日志订阅器

pub mod autonomy;
pub mod config;
pub mod core;
pub mod execution;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod planning;

pub use autonomy::{AutonomousExecutionResult, AutonomousLoop, TerminationReason};
pub use config::{load_config, AppConfig};
