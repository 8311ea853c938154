//! `mcp-orchestrator` command line.
//!
//! Reads one query per line from stdin and prints one JSON report per query.
//! `/clear` forgets the current session's conversation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use mcp_orchestrator::agent_core::{
    AgentFactory, AgentRegistration, AgentRegistry, AgentTargets, ChatAgentFactory, ChatExecutor,
    ExecutionCapability, OrchestrationLoop, Planner, SequentialAgentExecutor, ServerTargets,
    SessionThreadStore, TargetCatalog,
};
use mcp_orchestrator::config::{find_config_path, load_config, OrchestratorConfig};
use mcp_orchestrator::inference::{
    ChatCapability, EmbeddingProvider, HttpEmbeddingProvider, InferenceClient,
};
use mcp_orchestrator::mcp_client::ServerCatalog;
use mcp_orchestrator::retrieval::{HybridToolSearch, IndexCache};

#[derive(Parser)]
#[command(name = "mcp-orchestrator", version, about = "Route queries to MCP tool servers and agents")]
struct Cli {
    /// Config file; defaults to $MCP_ORCHESTRATOR_CONFIG or the nearest orchestrator.yaml
    #[arg(long)]
    config: Option<PathBuf>,
    /// Plan over servers (single agent) or over registered agents
    #[arg(long, value_enum, default_value_t = Mode::Tools)]
    mode: Mode,
    /// Session id; a fresh one is generated when omitted
    #[arg(long, env = "MCP_ORCHESTRATOR_SESSION")]
    session: Option<String>,
    /// Directory for orchestrator.log; defaults to the platform data directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
    /// Write logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    Tools,
    Agents,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_dir = cli.log_dir.clone().unwrap_or_else(mcp_orchestrator::data_dir);
    mcp_orchestrator::init_tracing(&log_dir, cli.log_json)?;

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => find_config_path(&std::env::current_dir()?)?,
    };
    let config = load_config(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    tracing::info!(config = %config_path.display(), mode = ?cli.mode, "configuration loaded");

    let catalog = Arc::new(ServerCatalog::new());
    for (name, e) in catalog.connect_configured(&config.servers).await {
        eprintln!("warning: server '{name}' is unavailable: {e}");
    }

    let session = cli.session.unwrap_or_else(|| Uuid::new_v4().to_string());
    let outcome = serve(&config, Arc::clone(&catalog), cli.mode, &session).await;
    catalog.disconnect_all().await;
    outcome
}

/// Wire the pipeline for `mode` and answer stdin until EOF.
async fn serve(
    config: &OrchestratorConfig,
    catalog: Arc<ServerCatalog>,
    mode: Mode,
    session: &str,
) -> Result<()> {
    let cache = Arc::new(IndexCache::open_in_dir(&config.resolve_cache_dir())?);
    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::new(HttpEmbeddingProvider::new(&config.embedding)?);
    let chat: Arc<dyn ChatCapability> = Arc::new(InferenceClient::new(config.chat.clone())?);
    let search = Arc::new(HybridToolSearch::new(catalog, Arc::clone(&embedder), Arc::clone(&cache)));
    let sessions = Arc::new(SessionThreadStore::new());
    let rounds = config.execution.max_tool_rounds;

    match mode {
        Mode::Tools => {
            let orchestrator = OrchestrationLoop::new(
                Planner::new(Arc::clone(&chat)),
                Arc::new(ServerTargets::new(search, config.retrieval.tool_top_k)),
                Arc::new(ChatExecutor::new(chat, config.execution.instructions.clone(), rounds)),
                sessions,
            );
            answer_lines(&orchestrator, session).await
        }
        Mode::Agents => {
            let factory: Arc<dyn AgentFactory> = Arc::new(ChatAgentFactory);
            let registry = AgentRegistry::new(
                config
                    .agents
                    .iter()
                    .cloned()
                    .map(|spec| AgentRegistration::new(spec, Arc::clone(&factory)))
                    .collect(),
            )?;
            let targets = AgentTargets::new(
                Arc::new(registry),
                search,
                embedder,
                cache,
                config.retrieval.agent_shortlist_k,
                config.retrieval.agent_tool_top_k,
            );
            let orchestrator = OrchestrationLoop::new(
                Planner::new(Arc::clone(&chat)),
                Arc::new(targets),
                Arc::new(SequentialAgentExecutor::new(chat, rounds)),
                sessions,
            );
            answer_lines(&orchestrator, session).await
        }
    }
}

async fn answer_lines<T, E>(orchestrator: &OrchestrationLoop<T, E>, session: &str) -> Result<()>
where
    T: TargetCatalog,
    E: ExecutionCapability<T::Item>,
{
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/clear" {
            let cleared = orchestrator.clear_session(session);
            println!("{}", serde_json::json!({ "session_id": session, "cleared": cleared }));
            continue;
        }

        match orchestrator.run(line, Some(session)).await {
            Ok(report) => println!("{}", serde_json::to_string(&report)?),
            Err(e) => {
                tracing::error!(kind = e.kind(), error = %e, "query failed");
                println!(
                    "{}",
                    serde_json::json!({ "error": { "kind": e.kind(), "message": e.to_string() } })
                );
            }
        }
    }
    Ok(())
}
