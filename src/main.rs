//! upgrader 入口：加载配置、组装 Engine、运行一次并打印报告
//!
//! 用法：`upgrader [--config path.toml] [goal...]`；未给出目标时使用配置中的 agent.goal。

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use upgrader::{config::load_config, observability, AgentBuilder};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    observability::init();

    let mut args = std::env::args().skip(1);
    let mut config_path: Option<PathBuf> = None;
    let mut goal_words = Vec::new();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            config_path = Some(args.next().context("--config needs a path")?.into());
        } else {
            goal_words.push(arg);
        }
    }

    let config = load_config(config_path).context("Failed to load config")?;
    let goal = if goal_words.is_empty() {
        config
            .agent
            .goal
            .clone()
            .context("No goal given: pass it as arguments or set agent.goal")?
    } else {
        goal_words.join(" ")
    };

    let engine = AgentBuilder::new(config)
        .build_engine()
        .context("Failed to build engine")?;

    match engine.run(&goal).await {
        Ok(report) => {
            println!("{}", report.summary);
            match (&report.pr_url, report.pr_url_observed) {
                (Some(url), true) => println!("\nPull request: {url}"),
                (Some(url), false) => println!("\nPull request (not confirmed by a tool result): {url}"),
                (None, _) => println!("\nNo pull request was opened."),
            }
            println!("Steps: {}", report.steps);
            Ok(ExitCode::SUCCESS)
        }
        Err(abort) => {
            eprintln!("{abort}");
            if let Some(last) = abort.history.last() {
                eprintln!(
                    "Last step {}: {} -> {}",
                    last.step,
                    if last.action.tool_name.is_empty() { "(unparsed)" } else { last.action.tool_name.as_str() },
                    last.result.output.lines().next().unwrap_or("")
                );
            }
            Ok(ExitCode::FAILURE)
        }
    }
}
