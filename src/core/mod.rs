//! 核心层：错误分类、层内并发调度、标识符工具

pub mod error;
pub mod ids;
pub mod task_scheduler;

pub use error::{AgentError, ErrorKind};
pub use ids::{short_hex, timestamped_id, truncate_chars};
pub use task_scheduler::TaskScheduler;
