//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__AUTONOMY__MAX_ITERATIONS=3`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub autonomy: AutonomySection,
    pub memory: MemorySection,
}

/// [app] 段：应用名与数据目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    pub data_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "hive".to_string(),
            data_dir: PathBuf::from("data"),
        }
    }
}

/// [llm] 段：后端选择、温度、重试与缓存
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：mock / openai
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub temperature: f32,
    /// 评审使用更低温度
    pub critic_temperature: f32,
    pub max_retries: u32,
    /// 首次重试等待，之后指数翻倍
    pub backoff_ms: u64,
    pub request_timeout_secs: u64,
    pub cache_enabled: bool,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            temperature: 0.7,
            critic_temperature: 0.3,
            max_retries: 3,
            backoff_ms: 1000,
            request_timeout_secs: 60,
            cache_enabled: true,
        }
    }
}

/// [autonomy] 段：自主循环的预算与阈值
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutonomySection {
    pub max_iterations: u32,
    pub score_threshold: f64,
    pub max_cost: Option<f64>,
    pub max_tokens: Option<u64>,
    pub timeout_seconds: Option<u64>,
    /// 规划前检索的相似经验条数
    pub memory_top_k: usize,
    /// 同一层内并发执行的任务上限
    pub max_parallel_tasks: usize,
    /// 每千 token 的成本，用于估算 total_cost
    pub cost_per_1k_tokens: f64,
}

impl Default for AutonomySection {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            score_threshold: 0.75,
            max_cost: None,
            max_tokens: None,
            timeout_seconds: None,
            memory_top_k: 3,
            max_parallel_tasks: 3,
            cost_per_1k_tokens: 0.002,
        }
    }
}

/// [memory] 段：短期容量、上下文预算、嵌入与经验日志目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub short_term_capacity: usize,
    pub context_max_tokens: usize,
    pub embedding_model: String,
    /// 本地哈希嵌入的维度
    pub embedding_dims: usize,
    pub long_term_collection: String,
    pub experience_log_dir: PathBuf,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            short_term_capacity: 50,
            context_max_tokens: 1000,
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dims: 256,
            long_term_collection: "long_term_memory".to_string(),
            experience_log_dir: PathBuf::from("data/experience_logs"),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.autonomy.max_iterations, 5);
        assert!((cfg.autonomy.score_threshold - 0.75).abs() < f64::EPSILON);
        assert!(cfg.autonomy.timeout_seconds.is_none());
        assert_eq!(cfg.memory.short_term_capacity, 50);
        assert_eq!(cfg.llm.provider, "mock");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[autonomy]\nmax_iterations = 2\ntimeout_seconds = 30\n\n[memory]\nshort_term_capacity = 7\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.autonomy.max_iterations, 2);
        assert_eq!(cfg.autonomy.timeout_seconds, Some(30));
        assert_eq!(cfg.autonomy.memory_top_k, 3);
        assert_eq!(cfg.memory.short_term_capacity, 7);
    }
}
