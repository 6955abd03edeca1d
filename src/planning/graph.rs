//! 任务依赖图
//!
//! 节点存放在按声明顺序排列的 arena 中，通过 id → 下标索引访问；`update_status` 是唯一的写入口。
//! 构造时校验：id 唯一、依赖存在、无环（DFS + 递归栈）。层序由 Kahn 算法给出，层内按声明顺序排列。

use std::collections::HashMap;

use serde_json::Value;

use crate::core::AgentError;
use crate::planning::types::{TaskId, TaskNode, TaskStatus};

#[derive(Debug, Clone)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    index: HashMap<TaskId, usize>,
    /// 下标 → 依赖它的节点下标
    dependents: Vec<Vec<usize>>,
}

impl TaskGraph {
    pub fn new(nodes: Vec<TaskNode>) -> Result<Self, AgentError> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(AgentError::DuplicateTask(node.id.clone()));
            }
        }

        let mut dependents = vec![Vec::new(); nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            for dep in &node.dependencies {
                let &d = index.get(dep).ok_or_else(|| AgentError::UnknownDependency {
                    task: node.id.clone(),
                    dependency: dep.clone(),
                })?;
                dependents[d].push(i);
            }
        }

        let graph = Self {
            nodes,
            index,
            dependents,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    fn check_acyclic(&self) -> Result<(), AgentError> {
        let n = self.nodes.len();
        let mut visited = vec![false; n];
        let mut on_stack = vec![false; n];
        for start in 0..n {
            if !visited[start] {
                self.dfs(start, &mut visited, &mut on_stack)?;
            }
        }
        Ok(())
    }

    /// 沿依赖边深度优先；回到递归栈中的节点即为环
    fn dfs(&self, i: usize, visited: &mut [bool], on_stack: &mut [bool]) -> Result<(), AgentError> {
        visited[i] = true;
        on_stack[i] = true;
        for dep in &self.nodes[i].dependencies {
            let d = self.index[dep];
            if on_stack[d] {
                return Err(AgentError::CyclicDependency(self.nodes[i].id.clone()));
            }
            if !visited[d] {
                self.dfs(d, visited, on_stack)?;
            }
        }
        on_stack[i] = false;
        Ok(())
    }

    fn levels_by_index(&self) -> Vec<Vec<usize>> {
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.dependencies.len()).collect();
        let mut current: Vec<usize> = (0..self.nodes.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut levels = Vec::new();

        while !current.is_empty() {
            let mut next = Vec::new();
            for &i in &current {
                for &dependent in &self.dependents[i] {
                    in_degree[dependent] -= 1;
                    if in_degree[dependent] == 0 {
                        next.push(dependent);
                    }
                }
            }
            next.sort_unstable();
            levels.push(std::mem::replace(&mut current, next));
        }
        levels
    }

    /// 分层执行顺序；同层节点互不依赖
    pub fn execution_order(&self) -> Vec<Vec<&TaskNode>> {
        self.levels_by_index()
            .into_iter()
            .map(|level| level.into_iter().map(|i| &self.nodes[i]).collect())
            .collect()
    }

    pub fn execution_levels(&self) -> Vec<Vec<TaskId>> {
        self.levels_by_index()
            .into_iter()
            .map(|level| level.into_iter().map(|i| self.nodes[i].id.clone()).collect())
            .collect()
    }

    /// Pending 且全部依赖已 Completed 的节点
    pub fn ready_tasks(&self) -> Vec<&TaskNode> {
        self.nodes
            .iter()
            .filter(|n| n.status == TaskStatus::Pending && self.dependencies_completed(&n.id))
            .collect()
    }

    pub fn dependencies_completed(&self, id: &str) -> bool {
        self.get(id).map_or(false, |node| {
            node.dependencies.iter().all(|dep| {
                self.get(dep)
                    .map_or(false, |d| d.status == TaskStatus::Completed)
            })
        })
    }

    /// 更新节点状态，可附带结果或错误
    pub fn update_status(
        &mut self,
        id: &str,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<(), AgentError> {
        let &i = self
            .index
            .get(id)
            .ok_or_else(|| AgentError::TaskNotFound(id.to_string()))?;
        let node = &mut self.nodes[i];
        node.status = status;
        if result.is_some() {
            node.result = result;
        }
        if error.is_some() {
            node.error = error;
        }
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.nodes.iter().all(|n| n.status.is_terminal())
    }

    pub fn completed(&self) -> Vec<&TaskNode> {
        self.with_status(TaskStatus::Completed)
    }

    pub fn failed(&self) -> Vec<&TaskNode> {
        self.with_status(TaskStatus::Failed)
    }

    pub fn pending(&self) -> Vec<&TaskNode> {
        self.with_status(TaskStatus::Pending)
    }

    fn with_status(&self, status: TaskStatus) -> Vec<&TaskNode> {
        self.nodes.iter().filter(|n| n.status == status).collect()
    }

    pub fn get(&self, id: &str) -> Option<&TaskNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn into_nodes(self) -> Vec<TaskNode> {
        self.nodes
    }
}
