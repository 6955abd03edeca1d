//! 经验日志：每轮迭代、每次运行、每条经验各写一个 JSON 文件
//!
//! 仅作审计留痕，循环本身从不读回；`load_recent_executions` 供人工或外部工具查看。

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::fs;

use crate::autonomy::{AutonomousExecutionResult, IterationResult};
use crate::core::AgentError;
use crate::memory::long_term::Experience;

#[derive(Debug, Clone)]
pub struct ExperienceLog {
    dir: PathBuf,
}

#[derive(Serialize)]
struct IterationRecord<'a> {
    execution_id: &'a str,
    #[serde(flatten)]
    iteration: &'a IterationResult,
}

impl ExperienceLog {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn stamp() -> String {
        Utc::now().format("%Y%m%d_%H%M%S_%3f").to_string()
    }

    async fn write_json<T: Serialize>(&self, file_name: String, record: &T) -> Result<PathBuf, AgentError> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(file_name);
        fs::write(&path, serde_json::to_vec_pretty(record)?).await?;
        tracing::debug!(path = %path.display(), "experience log written");
        Ok(path)
    }

    pub async fn log_iteration(
        &self,
        execution_id: &str,
        iteration: &IterationResult,
    ) -> Result<PathBuf, AgentError> {
        let name = format!("iteration_{}_{}.json", iteration.iteration, Self::stamp());
        self.write_json(name, &IterationRecord { execution_id, iteration })
            .await
    }

    pub async fn log_execution(&self, result: &AutonomousExecutionResult) -> Result<PathBuf, AgentError> {
        let name = format!("execution_{}_{}.json", result.execution_id, Self::stamp());
        self.write_json(name, result).await
    }

    pub async fn log_experience(&self, experience: &Experience) -> Result<PathBuf, AgentError> {
        let name = format!("experience_{}_{}.json", experience.id, Self::stamp());
        self.write_json(name, experience).await
    }

    /// 最近 n 次运行记录（按修改时间倒序）；目录不存在时返回空
    pub async fn load_recent_executions(&self, n: usize) -> Result<Vec<Value>, AgentError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("execution_") && name.ends_with(".json") {
                let modified = entry.metadata().await?.modified()?;
                files.push((modified, name, entry.path()));
            }
        }
        files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

        let mut records = Vec::with_capacity(n.min(files.len()));
        for (_, _, path) in files.into_iter().take(n) {
            let data = fs::read(&path).await?;
            records.push(serde_json::from_slice(&data)?);
        }
        Ok(records)
    }
}
