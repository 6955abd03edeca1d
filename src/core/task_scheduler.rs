//! 层内并发调度
//!
//! 同一调度层的节点互不依赖，可并行派发；Semaphore 限制同时运行的 Worker 数量，
//! 层与层之间的屏障由 Dispatcher 保证。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::AgentError;

/// 任务调度器：持有 Worker 并发许可
#[derive(Clone)]
pub struct TaskScheduler {
    /// Worker 并发限制（默认 3）
    worker_semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl TaskScheduler {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            worker_semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// 获取一个 Worker 执行许可；许可随返回值 drop 释放
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AgentError> {
        self.worker_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AgentError::Unexpected("worker semaphore closed".to_string()))
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// 当前可用许可数
    pub fn available(&self) -> usize {
        self.worker_semaphore.available_permits()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(3)
    }
}
