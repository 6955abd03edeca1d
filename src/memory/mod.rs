//! 记忆层：短期环形缓冲、长期经验库（嵌入 + 向量检索）、两级门面与经验日志

pub mod experience_log;
pub mod long_term;
pub mod short_term;
pub mod store;
pub mod tokenizer;
pub mod vector_store;

pub use experience_log::ExperienceLog;
pub use long_term::{Experience, LongTermMemory};
pub use short_term::{MemoryEntry, MemoryType, SessionInfo, ShortTermMemory};
pub use store::MemoryStore;
pub use vector_store::{cosine_similarity, FileVectorStore, InMemoryVectorStore, SearchHit, VectorStore};
