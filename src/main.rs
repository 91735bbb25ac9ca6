//! Bridge 命令行入口
//!
//! 初始化注册表 → 执行一次运行，事件逐行输出 JSON → 关闭全部会话。Ctrl+C 时同样关闭会话。

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use bridge::core::{EventStream, EventType, PipelineStep};
use bridge::{config::AppConfig, observability, Bridge};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;

#[derive(Parser)]
#[command(author, version, about = "Bridge - orchestrate local CLI agents")]
struct Args {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Print the agent catalog as JSON
    Agents,
    /// Run the generate / critique / refine loop
    Run {
        query: String,
        #[arg(short, long)]
        iterations: Option<u32>,
        #[arg(long)]
        skip_critique: bool,
        #[arg(long)]
        context: Option<String>,
    },
    /// Run a pipeline of agent:role[:model] steps
    Pipeline {
        query: String,
        #[arg(short, long = "step", required = true)]
        steps: Vec<String>,
        #[arg(short, long)]
        iterations: Option<u32>,
        #[arg(long)]
        context: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let args = Args::parse();

    // 配置错误不致命：告警后使用默认配置
    let bridge = match Bridge::from_config_path(args.config.clone()) {
        Ok(bridge) => bridge,
        Err(e) => {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Bridge::new(AppConfig::default())
        }
    };

    bridge.init().await;
    let outcome = tokio::select! {
        r = execute(&bridge, args.command) => r,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, closing sessions...");
            Ok(())
        }
    };
    bridge.close_all().await;
    outcome
}

async fn execute(bridge: &Bridge, command: CliCommand) -> anyhow::Result<()> {
    match command {
        CliCommand::Agents => {
            let snapshot = bridge.registry().snapshot().await;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        CliCommand::Run {
            query,
            iterations,
            skip_critique,
            context,
        } => print_events(bridge.run(&query, iterations, skip_critique, context)).await,
        CliCommand::Pipeline {
            query,
            steps,
            iterations,
            context,
        } => {
            let steps = steps
                .iter()
                .map(|s| PipelineStep::parse_spec(s).with_context(|| format!("Invalid step: {:?}", s)))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let events = bridge
                .run_pipeline(&query, steps, context, iterations)
                .await
                .context("Pipeline cannot start")?;
            print_events(events).await
        }
    }
}

/// 逐行输出事件；以 error 结束的运行返回错误（非零退出码）
async fn print_events(mut events: EventStream) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut terminal = None;
    while let Some(event) = events.next().await {
        let line = serde_json::to_string(&event)?;
        let mut out = stdout.lock();
        writeln!(out, "{}", line)?;
        out.flush()?;
        if event.is_terminal() {
            terminal = Some(event);
        }
    }
    match terminal {
        Some(event) if event.kind == EventType::Error => {
            anyhow::bail!("Run aborted: {}", event.content.unwrap_or_default())
        }
        _ => Ok(()),
    }
}
