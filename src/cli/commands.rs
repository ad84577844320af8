//! CLI command definitions for benchforge.
//!
//! Two commands: `run` executes one suite/scenario/tier combination,
//! `batch` fans a models manifest out across a whole suite. Both wire the
//! OpenRouter adapter, optional specialist wrapping, and a run store into
//! the orchestrator.

use anyhow::Context;
use clap::{Args, Parser};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::batch::{
    self, BatchOutcome, BatchRunner, BuiltAgent, Combination, CombinationAdapterFactory,
    ModelsManifest,
};
use crate::evaluation::EvaluatorSet;
use crate::llm::{AgentAdapter, OpenRouterAdapter};
use crate::orchestrator::{Orchestrator, RunOutcome, RunRequest, WarmupAdapterFactory};
use crate::specialist::{self, SpecialistAdapter};
use crate::storage::{InMemoryRunStore, PgRunStore, RunStatus, RunStore, StageFailureCount};

/// Benchmark harness for LLM agents over the OpenRouter API.
#[derive(Parser)]
#[command(name = "benchforge")]
#[command(about = "Run LLM-agent benchmarks against suite scenarios")]
#[command(version)]
#[command(
    long_about = "benchforge executes benchmark scenarios against LLM agents through OpenRouter,\nscores the results with code checks and an LLM judge, and persists runs to Postgres.\n\nExample usage:\n  benchforge run --suite web --scenario todo-app --tier junior --model openai/gpt-4o --no-db\n  benchforge batch --suite web --manifest models.yaml"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Execute one benchmark run.
    Run(RunArgs),

    /// Execute a combination matrix from a models manifest.
    Batch(BatchArgs),
}

/// Options shared by both commands.
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Root directory containing benchmark suites.
    #[arg(long, env = "BENCH_SUITES_DIR", default_value = "suites")]
    pub suites_dir: PathBuf,

    /// Directory containing specialist templates.
    #[arg(long, env = "BENCH_TEMPLATES_DIR", default_value = "templates")]
    pub templates_dir: PathBuf,

    /// OpenRouter API key.
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Postgres connection string; required unless --no-db is set.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,
}

/// Arguments for `benchforge run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Suite name under the suites directory.
    #[arg(long)]
    pub suite: String,

    /// Scenario name within the suite.
    #[arg(long)]
    pub scenario: String,

    /// Prompt tier to run.
    #[arg(long)]
    pub tier: String,

    /// Agent backend; only "openrouter" is available.
    #[arg(long)]
    pub agent: Option<String>,

    /// Model id sent to OpenRouter (falls back to BENCH_AGENT_MODEL, then
    /// the built-in default).
    #[arg(long)]
    pub model: Option<String>,

    /// Specialist template to wrap the agent with.
    #[arg(long)]
    pub specialist: Option<String>,

    /// Attach this run to an existing batch id.
    #[arg(long)]
    pub batch_id: Option<String>,

    /// Emit one compact result line instead of the full report.
    #[arg(short, long)]
    pub quiet: bool,

    /// Skip the warmup stage.
    #[arg(long)]
    pub skip_warmup: bool,

    /// Run only the LLM judge during evaluation.
    #[arg(long)]
    pub judge_only: bool,

    /// Use the in-memory run store instead of Postgres.
    #[arg(long)]
    pub no_db: bool,
}

/// Arguments for `benchforge batch`.
#[derive(Args, Debug)]
pub struct BatchArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Suite name under the suites directory.
    #[arg(long)]
    pub suite: String,

    /// Models manifest YAML (vanilla_models / specialists).
    #[arg(long)]
    pub manifest: PathBuf,

    /// Comma-separated scenario filter.
    #[arg(long, value_delimiter = ',')]
    pub scenarios: Option<Vec<String>>,

    /// Comma-separated tier filter.
    #[arg(long, value_delimiter = ',')]
    pub tiers: Option<Vec<String>>,

    /// Suppress the aggregate summary block.
    #[arg(short, long)]
    pub quiet: bool,

    /// Use the in-memory run store instead of Postgres.
    #[arg(long)]
    pub no_db: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before
/// running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_run_command(args).await,
        Commands::Batch(args) => run_batch_command(args).await,
    }
}

async fn run_run_command(args: RunArgs) -> anyhow::Result<()> {
    if let Some(agent) = &args.agent {
        if agent != "openrouter" {
            anyhow::bail!("unknown agent '{}'; only 'openrouter' is available", agent);
        }
    }

    let store = build_store(&args.common, args.no_db).await?;
    let built = build_agent(
        &args.common.api_key,
        &args.common.templates_dir,
        args.model.as_deref(),
        args.specialist.as_deref(),
    )?;
    let agent_name = built.adapter.name();
    let BuiltAgent {
        adapter,
        model,
        mcp_servers,
    } = built;

    let judge: Arc<dyn AgentAdapter> =
        Arc::new(OpenRouterAdapter::new(args.common.api_key.clone(), None));
    let orchestrator = Orchestrator::new(
        args.common.suites_dir.clone(),
        store.clone(),
        adapter,
        EvaluatorSet::standard(judge),
    )
    .with_mcp_servers(mcp_servers)
    .with_warmup_factory(warmup_factory(&args.common.api_key))
    .with_skip_warmup(args.skip_warmup)
    .with_judge_only(args.judge_only);

    let request = RunRequest {
        suite: args.suite.clone(),
        scenario: args.scenario.clone(),
        tier: args.tier.clone(),
        agent: agent_name,
        model,
        batch_id: args.batch_id.clone(),
    };
    let outcome = orchestrator
        .execute_run(&request)
        .await
        .context("persisting run")?;

    if args.quiet {
        println!("{}", batch::summary_line(&outcome.record));
    } else {
        print_run_report(&outcome, store_label(args.no_db));
    }

    if outcome.record.status == RunStatus::Failed {
        anyhow::bail!(
            "run failed at stage '{}'",
            outcome.record.failure_stage.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}

async fn run_batch_command(args: BatchArgs) -> anyhow::Result<()> {
    let store = build_store(&args.common, args.no_db).await?;
    let manifest = ModelsManifest::load(&args.manifest)?;
    let combinations = batch::expand_combinations(
        &args.common.suites_dir,
        &args.suite,
        &manifest,
        args.scenarios.as_deref(),
        args.tiers.as_deref(),
    )?;
    info!(
        suite = %args.suite,
        combinations = combinations.len(),
        "expanded combination matrix"
    );

    let api_key = args.common.api_key.clone();
    let templates_dir = args.common.templates_dir.clone();
    let factory: CombinationAdapterFactory = Arc::new(move |combo: &Combination| {
        build_agent(
            &api_key,
            &templates_dir,
            Some(&combo.model),
            combo.specialist.as_deref(),
        )
    });

    let judge: Arc<dyn AgentAdapter> =
        Arc::new(OpenRouterAdapter::new(args.common.api_key.clone(), None));
    let runner = BatchRunner::new(
        args.common.suites_dir.clone(),
        store.clone(),
        judge,
        factory,
        warmup_factory(&args.common.api_key),
    );

    let outcome = runner.execute(&args.suite, combinations).await?;
    if !args.quiet {
        let breakdown = if outcome.stats.failed_runs > 0 {
            store.failure_breakdown(&outcome.batch_id).await?
        } else {
            Vec::new()
        };
        print_batch_report(&outcome, &breakdown, store_label(args.no_db));
    }

    if outcome.stats.failed_runs > 0 {
        anyhow::bail!(
            "{} of {} runs failed",
            outcome.stats.failed_runs,
            outcome.stats.total_runs
        );
    }
    Ok(())
}

/// Builds the agent for one run: a bare OpenRouter adapter, or one wrapped
/// by the named specialist template.
fn build_agent(
    api_key: &str,
    templates_dir: &Path,
    model: Option<&str>,
    specialist: Option<&str>,
) -> anyhow::Result<BuiltAgent> {
    let base = OpenRouterAdapter::new(api_key.to_string(), model);
    let model_id = base.model().to_string();
    match specialist {
        None => Ok(BuiltAgent {
            adapter: Arc::new(base),
            model: model_id,
            mcp_servers: Vec::new(),
        }),
        Some(name) => {
            let path = specialist::find_template(templates_dir, name)
                .with_context(|| format!("locating specialist template '{}'", name))?;
            let template = specialist::load(&path)
                .with_context(|| format!("loading specialist template '{}'", name))?;
            let mcp_servers = template.dependencies.mcp_servers.clone();
            let adapter = SpecialistAdapter::new(template, Arc::new(base))
                .with_pipeline_adapter(OpenRouterAdapter::new(api_key.to_string(), None))
                .with_target_model(&model_id);
            Ok(BuiltAgent {
                adapter: Arc::new(adapter),
                model: model_id,
                mcp_servers,
            })
        }
    }
}

fn warmup_factory(api_key: &str) -> WarmupAdapterFactory {
    let api_key = api_key.to_string();
    Arc::new(move |model: Option<&str>| {
        Ok(Arc::new(OpenRouterAdapter::new(api_key.clone(), model)) as Arc<dyn AgentAdapter>)
    })
}

async fn build_store(common: &CommonArgs, no_db: bool) -> anyhow::Result<Arc<dyn RunStore>> {
    if no_db {
        info!("using in-memory run store; results will not survive this process");
        return Ok(Arc::new(InMemoryRunStore::new()));
    }
    let url = common.database_url.as_deref().ok_or_else(|| {
        anyhow::anyhow!("DATABASE_URL is not set; pass --no-db to run without persistence")
    })?;
    let store = PgRunStore::connect(url)
        .await
        .context("connecting to Postgres")?;
    Ok(Arc::new(store))
}

fn store_label(no_db: bool) -> &'static str {
    if no_db {
        "in-memory"
    } else {
        "postgres"
    }
}

fn print_run_report(outcome: &RunOutcome, store_label: &str) {
    let run = &outcome.record;
    println!("\n=== Run Result ===");
    println!("Run id:     {}", run.id);
    println!("Target:     {}/{}/{}", run.suite, run.scenario, run.tier);
    println!("Agent:      {}", run.agent);
    println!("Model:      {}", run.model);
    match run.status {
        RunStatus::Failed => {
            println!(
                "Status:     failed at {}",
                run.failure_stage.as_deref().unwrap_or("unknown")
            );
            if let Some(error) = &run.error {
                println!("Error:      {}", error);
            }
        }
        _ => {
            println!("Status:     {}", run.status.as_str());
            println!("Weighted:   {:.2} / 10", run.weighted_total.unwrap_or(0.0));
            println!(
                "Successful: {} (metric {:.2})",
                if run.is_successful.unwrap_or(false) {
                    "yes"
                } else {
                    "no"
                },
                run.success_metric.unwrap_or(0.0),
            );
        }
    }
    if let Some(scores) = &run.scores {
        println!("\nScores:");
        for (name, score) in scores.iter() {
            println!("  {:22} {:.2}", name, score);
        }
    }
    if let Some(telemetry) = &outcome.telemetry {
        println!("\nTelemetry:");
        println!(
            "  Tokens:     {} in / {} out",
            telemetry.input_tokens, telemetry.output_tokens
        );
        println!("  Cost:       ${:.4}", telemetry.cost_usd);
        println!("  Tool calls: {}", telemetry.tool_calls);
        println!("  Duration:   {:.1}s", telemetry.duration_ms as f64 / 1000.0);
        if let Some(workspace) = &telemetry.workspace {
            println!("  Workspace:  {}", workspace);
        }
    }
    println!("\nPersisted run {} ({} store)", run.id, store_label);
}

fn print_batch_report(
    outcome: &BatchOutcome,
    breakdown: &[StageFailureCount],
    store_label: &str,
) {
    println!("\n=== Batch Results ===");
    println!("Batch id:    {}", outcome.batch_id);
    println!("Total runs:  {}", outcome.stats.total_runs);
    println!("Completed:   {}", outcome.stats.completed_runs);
    println!("Failed:      {}", outcome.stats.failed_runs);
    println!("Successful:  {}", outcome.stats.successful_runs);
    if let Some(avg) = outcome.stats.avg_weighted_score {
        println!("Avg score:   {:.2}", avg);
    }
    if !breakdown.is_empty() {
        println!("Failures by stage:");
        for entry in breakdown {
            println!("  {:12} {}", entry.stage, entry.count);
        }
    }
    println!("\nPersisted batch {} ({} store)", outcome.batch_id, store_label);
}
