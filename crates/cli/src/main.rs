use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tourney_domain::config::{AgentConfig, ToolPolicy, TournamentConfig};
use tourney_providers::openai_compat::OpenAiCompatProvider;
use tourney_providers::LlmProvider;
use tourney_runtime::subagent::SubAgent;
use tourney_runtime::tournament::TournamentScheduler;

#[derive(Parser)]
#[command(name = "tourney", about = "Run a single task agent or a multi-round agent tournament")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one agent against a single task in an isolated workspace.
    Run {
        /// The task description given to the agent.
        task: String,
        /// Directory the agent's workspace, output, and logs live under.
        #[arg(long, default_value = "./workspace")]
        workspace: PathBuf,
        /// Model identifier override.
        #[arg(long)]
        model: Option<String>,
        /// Allow the agent to execute code via the run_code tool.
        #[arg(long)]
        allow_code_execution: bool,
    },
    /// Run a tournament: successive rounds of independent agents narrowing
    /// toward a synthesized result.
    Tournament {
        /// The topic or goal the tournament explores.
        topic: String,
        /// Directory tournament rounds and final output are written under.
        #[arg(long, default_value = "./tournaments")]
        base_path: PathBuf,
        /// Agent count per round, first to last (defaults to 4,3,2).
        #[arg(long, value_delimiter = ',')]
        stages: Option<Vec<u32>>,
        /// Model identifier override.
        #[arg(long)]
        model: Option<String>,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tourney=debug")))
        .json()
        .init();
}

/// Build the single configured LLM provider from environment variables.
/// `TOURNEY_API_KEY` is required; `TOURNEY_BASE_URL` and `TOURNEY_MODEL`
/// fall back to OpenAI's API and `gpt-4o-mini`.
fn build_provider() -> anyhow::Result<Arc<dyn LlmProvider>> {
    let api_key = std::env::var("TOURNEY_API_KEY").context("TOURNEY_API_KEY is not set")?;
    let base_url = std::env::var("TOURNEY_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let model = std::env::var("TOURNEY_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());

    let provider = OpenAiCompatProvider::new("default", base_url, api_key)?.with_default_model(model);
    Ok(Arc::new(provider))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Run { task, workspace, model, allow_code_execution } => run_single(task, workspace, model, allow_code_execution).await,
        Command::Tournament { topic, base_path, stages, model } => run_tournament(topic, base_path, stages, model).await,
    }
}

async fn run_single(task: String, workspace: PathBuf, model: Option<String>, allow_code_execution: bool) -> anyhow::Result<()> {
    let provider = build_provider()?;
    std::fs::create_dir_all(&workspace)?;

    let mut config = AgentConfig::default();
    if let Some(model) = model {
        config.model = model;
    }

    let sub = SubAgent::new(task, &workspace, config, provider, ToolPolicy::default(), allow_code_execution).await?;
    let status = sub.run("You are a focused, sandboxed task agent. Use your tools, then call complete_task when you are done.").await;

    tracing::info!(?status, "agent run finished");
    let outputs = sub.collect_outputs()?;
    println!("{}", serde_json::to_string_pretty(&outputs)?);
    Ok(())
}

async fn run_tournament(topic: String, base_path: PathBuf, stages: Option<Vec<u32>>, model: Option<String>) -> anyhow::Result<()> {
    let provider = build_provider()?;
    std::fs::create_dir_all(&base_path)?;

    let scheduler = TournamentScheduler::new(&base_path, TournamentConfig::default(), provider);
    let tournament = scheduler.create_tournament(topic, stages, model)?;

    tracing::info!(id = %tournament.id, "tournament created");
    let finished = scheduler.run_tournament(&tournament.id).await.map_err(|e| anyhow::anyhow!(e))?;

    println!("{}", serde_json::to_string_pretty(&finished)?);
    Ok(())
}
