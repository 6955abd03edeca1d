//! Worker 与能力注册表
//!
//! 每个能力角色映射到一个 Worker；新增角色只需注册新的 Worker，Dispatcher 无需改动。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::planning::{CapabilityRole, TaskNode};

/// 执行单个任务节点；Err 为失败原因，节点将被标记为 Failed
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, task: &TaskNode) -> Result<Value, String>;
}

/// 能力角色 → Worker 的静态映射，启动时构建
#[derive(Default, Clone)]
pub struct WorkerRegistry {
    workers: HashMap<CapabilityRole, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, role: CapabilityRole, worker: impl Worker + 'static) {
        self.workers.insert(role, Arc::new(worker));
    }

    pub fn with(mut self, role: CapabilityRole, worker: impl Worker + 'static) -> Self {
        self.register(role, worker);
        self
    }

    pub fn get(&self, role: &CapabilityRole) -> Option<Arc<dyn Worker>> {
        self.workers.get(role).cloned()
    }

    pub fn roles(&self) -> Vec<CapabilityRole> {
        let mut roles: Vec<CapabilityRole> = self.workers.keys().cloned().collect();
        roles.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        roles
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("roles", &self.roles())
            .finish()
    }
}

type WorkerFn = dyn Fn(&TaskNode) -> Result<Value, String> + Send + Sync;

/// 以闭包实现的同步 Worker
pub struct FnWorker {
    name: String,
    f: Box<WorkerFn>,
}

impl FnWorker {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&TaskNode) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(f),
        }
    }
}

#[async_trait]
impl Worker for FnWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, task: &TaskNode) -> Result<Value, String> {
        (self.f)(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_lookup() {
        let registry = WorkerRegistry::new()
            .with(
                CapabilityRole::Researcher,
                FnWorker::new("echo", |t| Ok(Value::from(t.description.clone()))),
            )
            .with(
                CapabilityRole::Custom("translator".into()),
                FnWorker::new("tr", |_| Ok(Value::Null)),
            );

        assert_eq!(registry.len(), 2);
        assert!(registry.get(&CapabilityRole::Evaluator).is_none());

        let worker = registry.get(&CapabilityRole::Researcher).unwrap();
        let task = TaskNode::new("t", "look around", CapabilityRole::Researcher);
        assert_eq!(worker.execute(&task).await.unwrap(), "look around");
        assert!(registry
            .get(&CapabilityRole::from("translator"))
            .is_some());
    }
}
