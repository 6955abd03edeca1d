//! 短期记忆：固定容量的环形缓冲
//!
//! 超出容量时按 FIFO 淘汰最旧条目；clear 开启新会话。上下文拼装按约 4 字符 / token 估算，
//! 从最新条目向前装填，输出时恢复为时间正序。

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::short_hex;

const CHARS_PER_TOKEN: usize = 4;

/// 记忆条目类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Action,
    Reasoning,
    Result,
    Feedback,
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemoryType::Action => "action",
            MemoryType::Reasoning => "reasoning",
            MemoryType::Result => "result",
            MemoryType::Feedback => "feedback",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub memory_type: MemoryType,
}

impl MemoryEntry {
    pub fn new(content: impl Into<String>, memory_type: MemoryType) -> Self {
        Self {
            id: format!("stm_{}", short_hex(12)),
            content: content.into(),
            metadata: Map::new(),
            timestamp: Utc::now(),
            memory_type,
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    fn context_line(&self) -> String {
        format!("[{}] {}", self.memory_type, self.content)
    }
}

/// 会话概况
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub entry_count: usize,
    pub capacity: usize,
}

#[derive(Debug, Clone)]
pub struct ShortTermMemory {
    entries: VecDeque<MemoryEntry>,
    capacity: usize,
    session_id: String,
    started_at: DateTime<Utc>,
}

impl ShortTermMemory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            session_id: new_session_id(),
            started_at: Utc::now(),
        }
    }

    /// 追加一条记忆并返回其 id；超出容量时淘汰最旧条目
    pub fn add(
        &mut self,
        content: impl Into<String>,
        memory_type: MemoryType,
        metadata: Option<Map<String, Value>>,
    ) -> String {
        let entry = MemoryEntry::new(content, memory_type).with_metadata(metadata.unwrap_or_default());
        let id = entry.id.clone();
        self.push(entry);
        id
    }

    pub fn push(&mut self, entry: MemoryEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// 最近 n 条（可按类别过滤），时间正序
    pub fn get_recent(&self, n: usize, memory_type: Option<MemoryType>) -> Vec<MemoryEntry> {
        let mut recent: Vec<MemoryEntry> = self
            .entries
            .iter()
            .rev()
            .filter(|e| memory_type.map_or(true, |t| e.memory_type == t))
            .take(n)
            .cloned()
            .collect();
        recent.reverse();
        recent
    }

    pub fn get_all(&self, memory_type: Option<MemoryType>) -> Vec<MemoryEntry> {
        self.entries
            .iter()
            .filter(|e| memory_type.map_or(true, |t| e.memory_type == t))
            .cloned()
            .collect()
    }

    /// 在 token 预算内拼装上下文：从最新条目开始装填，装不下即停止
    pub fn get_context(&self, max_tokens: usize) -> String {
        let budget = max_tokens.saturating_mul(CHARS_PER_TOKEN);
        let mut used = 0usize;
        let mut lines = Vec::new();
        for entry in self.entries.iter().rev() {
            let line = entry.context_line();
            let cost = line.chars().count() + 1;
            if used + cost > budget {
                break;
            }
            used += cost;
            lines.push(line);
        }
        lines.reverse();
        lines.join("\n")
    }

    /// 清空并开启新会话
    pub fn clear(&mut self) {
        self.entries.clear();
        self.session_id = new_session_id();
        self.started_at = Utc::now();
    }

    pub fn session_info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id.clone(),
            started_at: self.started_at,
            entry_count: self.entries.len(),
            capacity: self.capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn new_session_id() -> String {
    format!("session_{}", short_hex(12))
}
