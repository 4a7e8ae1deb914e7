// crates/taskloom-cli/src/main.rs
// ============================================================================
// Module: Task Loom CLI
// Description: Binary entry point: poll-loop runner and gate subcommands.
// Purpose: Wire concrete `Store`/`EventSink`/`Executor`/`WorkspaceManager`
//          implementations into an `Engine` and drive it from the terminal.
// Dependencies: anyhow, clap, env_logger, taskloom-{core,config,broker,
//               contract,providers,store-sqlite,workspace}
// ============================================================================

//! ## Overview
//! `taskloom run` starts the poll loop against the configured `SQLite`
//! store, HTTP executor, and git/sandbox workspace manager. `taskloom gate
//! approve|reject|revise` resolves a pending gate out-of-band, matching the
//! engine's design of never blocking its own poll loop on a human decision.

mod circuit_breaker;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use taskloom_broker::BrokerEventSink;
use taskloom_broker::LogSink;
use taskloom_config::TaskLoomConfig;
use taskloom_contract::DefaultContractExtractor;
use taskloom_core::Engine;
use taskloom_core::EngineConfig;
use taskloom_core::GateId;
use taskloom_core::GateOutcome;
use taskloom_core::Template;
use taskloom_providers::HttpExecutor;
use taskloom_providers::HttpExecutorConfig;
use taskloom_store_sqlite::SqliteStore;
use taskloom_workspace::GitWorkspaceConfig;
use taskloom_workspace::GitWorkspaceManager;

use crate::circuit_breaker::ThresholdCircuitBreaker;

// ============================================================================
// SECTION: CLI Surface
// ============================================================================

/// Task Loom: an agent task orchestration engine.
#[derive(Debug, Parser)]
#[command(name = "taskloom", version, about)]
struct Cli {
    /// Path to the TOML configuration file. Falls back to `$TASKLOOM_CONFIG`
    /// then `./taskloom.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Runs the poll loop, driving claimed tasks to completion.
    Run {
        /// Path to the template JSON file describing the pipeline to run.
        #[arg(long)]
        template: PathBuf,
    },
    /// Resolves a pending human-approval gate.
    Gate {
        #[command(subcommand)]
        action: GateAction,
    },
}

#[derive(Debug, Subcommand)]
enum GateAction {
    /// Approves a gate, allowing the driver to continue.
    Approve {
        /// Gate identifier.
        gate_id: String,
    },
    /// Rejects a gate, triggering a retry of the preceding stage.
    Reject {
        /// Gate identifier.
        gate_id: String,
        /// Optional rationale recorded alongside the rejection.
        #[arg(long)]
        comment: Option<String>,
    },
    /// Revises a gate with replacement content.
    Revise {
        /// Gate identifier.
        gate_id: String,
        /// Replacement content the driver should re-run with.
        content: String,
        /// Optional rationale recorded alongside the revision.
        #[arg(long)]
        comment: Option<String>,
    },
}

// ============================================================================
// SECTION: Main
// ============================================================================

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = TaskLoomConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Run { template } => run(&config, &template),
        Command::Gate { action } => gate(&config, action),
    }
}

#[allow(clippy::print_stdout)]
fn run(config: &TaskLoomConfig, template_path: &PathBuf) -> anyhow::Result<()> {
    let template_text = std::fs::read_to_string(template_path).context("reading template file")?;
    let template: Template = serde_json::from_str(&template_text).context("parsing template file")?;

    let store: Arc<dyn taskloom_core::Store> =
        Arc::new(SqliteStore::open(std::path::Path::new(&config.store.database_path)).context("opening store")?);
    let event_sink: Arc<dyn taskloom_core::EventSink> = Arc::new(BrokerEventSink::new(LogSink));
    let executor: Arc<dyn taskloom_core::Executor> = Arc::new(
        HttpExecutor::new(HttpExecutorConfig {
            base_url: config.executor.base_url.clone(),
            timeout_margin_secs: config.executor.timeout_margin_secs,
        })
        .context("building executor client")?,
    );
    let workspace: Arc<dyn taskloom_core::WorkspaceManager> = Arc::new(
        GitWorkspaceManager::new(GitWorkspaceConfig {
            worktrees_root: config.workspace.worktrees_root.clone(),
            repo_path: config.workspace.repo_path.clone(),
            sandbox_base_url: config.workspace.sandbox_base_url.clone(),
            remote_name: config.workspace.remote_name.clone(),
        })
        .context("building workspace manager")?,
    );
    let compressor: Arc<dyn taskloom_core::Compressor> = Arc::new(taskloom_core::FallbackCompressor);
    let contract_extractor: Arc<dyn taskloom_core::ContractExtractor> = Arc::new(DefaultContractExtractor);
    let circuit_breaker: Arc<dyn taskloom_core::CircuitBreakerHook> =
        Arc::new(ThresholdCircuitBreaker::new(config.circuit_breaker));

    let engine = Engine::new(
        store,
        event_sink,
        executor,
        workspace,
        compressor,
        contract_extractor,
        circuit_breaker,
        EngineConfig {
            stale_after_secs: config.engine.stale_after_secs,
            gate_default_timeout_secs: config.engine.gate_default_timeout_secs,
            confidence_review_threshold: config.engine.confidence_review_threshold,
            gate_poll_interval_secs: config.engine.gate_poll_interval_secs,
            graph_max_loop_iterations: config.engine.graph_max_loop_iterations,
        },
    );

    println!("taskloom: starting poll loop (interval {}s)", config.engine.poll_interval_secs);
    loop {
        let claimed = engine.poll_once(|_task| Ok(template.clone())).context("poll loop iteration")?;
        if !claimed {
            std::thread::sleep(std::time::Duration::from_secs(config.engine.poll_interval_secs));
        }
    }
}

#[allow(clippy::print_stdout)]
fn gate(config: &TaskLoomConfig, action: GateAction) -> anyhow::Result<()> {
    let store = SqliteStore::open(std::path::Path::new(&config.store.database_path)).context("opening store")?;
    let store: Arc<dyn taskloom_core::Store> = Arc::new(store);

    let (gate_id, outcome) = match action {
        GateAction::Approve { gate_id } => (gate_id, GateOutcome::Approved),
        GateAction::Reject { gate_id, comment } => (gate_id, GateOutcome::Rejected { comment, retry_count: 0 }),
        GateAction::Revise { gate_id, content, comment } => (gate_id, GateOutcome::Revised { comment, content }),
    };

    let gate_id = GateId::new(gate_id);
    let resolved = store.refresh_gate(&gate_id, outcome).context("resolving gate")?;
    println!("gate {} resolved as {:?}", resolved.id, resolved.status);
    Ok(())
}
