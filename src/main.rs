// Marten - streaming, tool-augmented conversation engine
// Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use marten::cli::{LineInput, Repl, TerminalApproval};
use marten::config::{default_config_path, load_config_from_path, FileHostSource};
use marten::logging::init_tracing;
use marten::orchestrator::{OrchestratorSettings, ToolCallOrchestrator};
use marten::providers::HttpProvider;
use marten::tools::approval::{AllowAll, ApprovalGate};
use marten::tools::hosts::{HostOutcome, ToolHostManager};
use marten::tools::permissions::PermissionStore;

#[derive(Parser, Debug)]
#[command(name = "marten", version, about = "Chat with a model that can call tools")]
struct Args {
    /// Run this prompt once and exit; without it prompts are read from stdin
    prompt: Option<String>,

    /// Config file (default ~/.marten/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Approve every tool call without asking
    #[arg(short, long)]
    yes: bool,

    /// Ask before every tool call, ignoring remembered approvals.
    /// Without it `features.always_ask` decides, and a stored setting from
    /// an earlier run is cleared when both are off.
    #[arg(long)]
    always_ask: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = load_config_from_path(&config_path)?;
    init_tracing(config.features.debug_logging);

    let hosts = Arc::new(ToolHostManager::new(Arc::new(FileHostSource::new(
        &config_path,
    ))));
    let report = hosts.reload().await.context("Failed to load tool hosts")?;
    for (host_id, outcome) in &report.outcomes {
        match outcome {
            HostOutcome::Connected { tool_count } => {
                info!(host = %host_id, tools = tool_count, "Tool host ready")
            }
            HostOutcome::Failed { error } => {
                warn!(host = %host_id, "Tool host unavailable: {}", error)
            }
        }
    }

    let mut store = PermissionStore::open(config.permissions_path()?)
        .with_ttl(chrono::Duration::hours(config.permissions.ttl_hours));
    store.set_always_ask(args.always_ask || config.features.always_ask)?;
    let permissions = Arc::new(Mutex::new(store));

    let input = Arc::new(LineInput::stdin()?);
    let approval: Arc<dyn ApprovalGate> = if args.yes || config.features.auto_approve_tools {
        Arc::new(AllowAll)
    } else {
        Arc::new(TerminalApproval::new(input.clone()))
    };

    let provider = Arc::new(HttpProvider::from_config(&config.backend)?);
    let orchestrator = ToolCallOrchestrator::new(provider, hosts.clone(), permissions, approval)
        .with_settings(OrchestratorSettings::from_config(&config));

    let mut repl = Repl::new(orchestrator, input);
    let result = match args.prompt {
        Some(prompt) => repl
            .run_once(&prompt)
            .await
            .map(|_| ())
            .map_err(anyhow::Error::from),
        None => repl.run().await,
    };

    hosts.shutdown_all().await;
    result
}
