//! Hive 命令行入口
//!
//! 加载配置、构建 LLM 栈与四个默认角色 Worker，运行自主循环并打印摘要。

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;

use hive::autonomy::{AutonomousLoop, LoopEvent};
use hive::execution::default_registry;
use hive::llm::{create_embedder_from_config, create_llm_from_config};
use hive::{load_config, observability};

#[derive(Parser, Debug)]
#[command(name = "hive")]
#[command(version, about = "Autonomous multi-agent planner: decompose, execute, critique, refine")]
struct Cli {
    /// 高层目标
    goal: String,

    /// 额外的配置文件（叠加在 config/default.toml 之上）
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    max_iterations: Option<u32>,

    /// 评分阈值（0.0 - 1.0）
    #[arg(long)]
    threshold: Option<f64>,

    /// 墙钟超时（秒）
    #[arg(long)]
    timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let cli = Cli::parse();

    let mut config = load_config(cli.config.clone()).context("Failed to load configuration")?;
    if let Some(n) = cli.max_iterations {
        config.autonomy.max_iterations = n;
    }
    if let Some(t) = cli.threshold {
        anyhow::ensure!((0.0..=1.0).contains(&t), "threshold must be within [0, 1], got {}", t);
        config.autonomy.score_threshold = t;
    }
    if let Some(secs) = cli.timeout {
        config.autonomy.timeout_seconds = Some(secs);
    }
    tracing::info!(
        app = %config.app.name,
        data_dir = %config.app.data_dir.display(),
        provider = %config.llm.provider,
        "configuration loaded"
    );

    let llm = create_llm_from_config(&config.llm);
    let embedder = create_embedder_from_config(
        &config.llm.provider,
        config.llm.base_url.as_deref(),
        &config.memory,
    );
    let registry = default_registry(llm.clone(), config.llm.temperature);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let progress = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                LoopEvent::IterationStarted {
                    iteration,
                    max_iterations,
                } => eprintln!("== Iteration {}/{} ==", iteration, max_iterations),
                LoopEvent::PlanReady { version, tasks, .. } => {
                    eprintln!("plan v{} ready: {} tasks", version, tasks)
                }
                LoopEvent::ExecutionDone {
                    completed,
                    failed,
                    elapsed_ms,
                    ..
                } => eprintln!(
                    "executed: {} completed, {} failed in {}ms",
                    completed, failed, elapsed_ms
                ),
                LoopEvent::Critiqued { overall_score, .. } => {
                    eprintln!("critique score: {:.2}/1.0", overall_score)
                }
                LoopEvent::Terminated { reason, .. } => eprintln!("terminated: {}", reason),
            }
        }
    });

    let agent = AutonomousLoop::from_config(&config, llm, embedder, registry)
        .context("Failed to open long-term memory")?
        .with_event_sender(event_tx);
    let result = agent.run(&cli.goal, None).await;
    drop(agent);
    progress.await.context("Progress printer failed")?;

    println!("{}", AutonomousLoop::summary(&result));
    if let Some(final_result) = &result.final_result {
        let rendered = match final_result {
            serde_json::Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).context("Failed to render result")?,
        };
        println!("\n{}", rendered);
    }
    Ok(())
}
