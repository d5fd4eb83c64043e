//! The `gantry` CLI: run, resume, validate, and export pipelines.
//!
//! Exit codes: 0 success, 1 pipeline failed, 2 aborted, 3 configuration
//! or validation error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};

use gantry_agent::{AgentLoop, LocalEnvironment, ProviderProfile};
use gantry_core::{
    visualize, Engine, EngineConfig, FsLogStore, Graph, PipelineResult, PipelineStatus, RawGraph,
    TracingEmitter, VisualizationFormat,
};
use gantry_llm::Client;

#[derive(Parser)]
#[command(name = "gantry", version, about = "Run agent pipelines from declarative graphs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a pipeline from a YAML definition.
    Run {
        /// Path to the pipeline YAML file.
        pipeline: PathBuf,

        /// Directory for run logs and checkpoints.
        #[arg(long, default_value = "gantry-logs")]
        logs: PathBuf,

        /// Execute codergen stages against real providers (detected from
        /// the environment) instead of simulation mode.
        #[arg(long)]
        live: bool,

        /// Provider for live runs.
        #[arg(long, default_value = "anthropic")]
        provider: String,

        /// Model for live runs.
        #[arg(long, default_value = "claude-sonnet-4-20250514")]
        model: String,

        /// Working directory handed to agent tools.
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
    },

    /// Resume a run from the checkpoint in a log directory.
    Resume {
        pipeline: PathBuf,

        #[arg(long, default_value = "gantry-logs")]
        logs: PathBuf,

        #[arg(long)]
        live: bool,

        #[arg(long, default_value = "anthropic")]
        provider: String,

        #[arg(long, default_value = "claude-sonnet-4-20250514")]
        model: String,

        #[arg(long, default_value = ".")]
        workdir: PathBuf,
    },

    /// Compile and validate a pipeline without running it.
    Validate { pipeline: PathBuf },

    /// Render a pipeline graph for inspection.
    Export {
        pipeline: PathBuf,

        #[arg(long, value_enum, default_value = "dot")]
        format: ExportFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Dot,
    Mermaid,
}

fn load_graph(path: &PathBuf) -> anyhow::Result<Graph> {
    let raw = RawGraph::from_yaml_file(path)
        .with_context(|| format!("cannot load pipeline {}", path.display()))?;
    Ok(Graph::compile(raw)?)
}

fn engine_config(
    logs: &PathBuf,
    live: bool,
    provider: &str,
    model: &str,
    workdir: &PathBuf,
) -> EngineConfig {
    let mut config = EngineConfig::new()
        .with_log_store(Arc::new(FsLogStore::new(logs.clone())))
        .with_emitter(Arc::new(TracingEmitter));

    if live {
        let agent = AgentLoop::new(
            Client::from_env(),
            ProviderProfile::new(provider, model),
            Arc::new(LocalEnvironment::new(workdir.clone())),
        );
        config = config.with_backend(Arc::new(agent));
    }
    config
}

fn report(result: &PipelineResult) -> ExitCode {
    match result.status {
        PipelineStatus::Completed => {
            println!("completed: {}", result.completed_nodes.join(" -> "));
            ExitCode::SUCCESS
        }
        PipelineStatus::Failed => {
            eprintln!(
                "failed: {}",
                result.failure_reason.as_deref().unwrap_or("unknown reason")
            );
            ExitCode::from(1)
        }
        PipelineStatus::Aborted => {
            eprintln!("aborted");
            ExitCode::from(2)
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            pipeline,
            logs,
            live,
            provider,
            model,
            workdir,
        } => {
            let graph = load_graph(&pipeline)?;
            let config = engine_config(&logs, live, &provider, &model, &workdir);
            let result = Engine::new(config).run_from_graph(&graph).await?;
            Ok(report(&result))
        }
        Command::Resume {
            pipeline,
            logs,
            live,
            provider,
            model,
            workdir,
        } => {
            let graph = load_graph(&pipeline)?;
            let config = engine_config(&logs, live, &provider, &model, &workdir);
            let result = Engine::new(config).resume_from_checkpoint(&graph).await?;
            Ok(report(&result))
        }
        Command::Validate { pipeline } => {
            let graph = load_graph(&pipeline)?;
            for warning in &graph.warnings {
                eprintln!("warning: {}", warning.message);
            }
            println!(
                "ok: {} ({} nodes, {} edges)",
                graph.name,
                graph.node_count(),
                graph.edges().len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Export { pipeline, format } => {
            let graph = load_graph(&pipeline)?;
            let format = match format {
                ExportFormat::Dot => VisualizationFormat::Dot,
                ExportFormat::Mermaid => VisualizationFormat::Mermaid,
            };
            print!("{}", visualize(&graph, format));
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    match run().await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(3)
        }
    }
}
