//! The benchmark run state machine.
//!
//! One run walks six gated stages: Setup, Warmup, Workspace, Agent,
//! Validation, Evaluation. Stages are strictly sequential; the first
//! failure terminates the run with a record tagged by the failing stage
//! name, and whatever happened up to that point (telemetry, workspace
//! path) is still persisted. Exactly one completion call reaches the run
//! store per run, on every path.
//!
//! A wall-clock watchdog armed from the scenario's `timeout_minutes` runs
//! alongside the stages. It never aborts in-flight work; it is checked at
//! stage boundaries and marks the run failed with stage `timeout`.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AgentError;
use crate::evaluation::{EvaluationContext, EvaluationDetail, EvaluatorSet};
use crate::llm::{
    AgentAdapter, AgentRequest, AgentResponse, ChatMessage, ToolHandlerMap,
};
use crate::mcp::{McpServerConfig, McpToolSet};
use crate::scenario::Scenario;
use crate::scoring::{
    calculate_success, compute_weighted_totals, CommandLogEntry, ScoreCard, SuccessReport,
    WeightedTotals,
};
use crate::storage::{RunRecord, RunStatus, RunStore, RunTelemetry};
use crate::tools::{run_shell, truncate_output, workspace_tool_set, OracleTool};
use crate::warmup;
use crate::workspace;

/// Per-command timeout for validation commands unless the scenario
/// overrides it.
const DEFAULT_VALIDATION_TIMEOUT_SECS: u64 = 300;

/// Stored stdout/stderr per validation command is bounded.
const VALIDATION_OUTPUT_CHARS: usize = 8_000;

/// Builds agent adapters for warmups, honoring the warmup's model
/// override.
pub type WarmupAdapterFactory =
    Arc<dyn Fn(Option<&str>) -> Result<Arc<dyn AgentAdapter>, AgentError> + Send + Sync>;

/// Identifies one combination to execute.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub suite: String,
    pub scenario: String,
    pub tier: String,
    /// Display name of the agent configuration ("openrouter", or a
    /// specialist composite).
    pub agent: String,
    pub model: String,
    pub batch_id: Option<String>,
}

/// What one `execute_run` call produced: the persisted record plus the
/// telemetry that was appended to it, for callers that report verbosely.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub record: RunRecord,
    pub telemetry: Option<RunTelemetry>,
}

/// Drives benchmark runs through the stage machine.
pub struct Orchestrator {
    suites_root: PathBuf,
    store: Arc<dyn RunStore>,
    agent: Arc<dyn AgentAdapter>,
    evaluators: EvaluatorSet,
    warmup_factory: Option<WarmupAdapterFactory>,
    mcp_servers: Vec<McpServerConfig>,
    skip_warmup: bool,
    judge_only: bool,
}

impl Orchestrator {
    pub fn new(
        suites_root: impl Into<PathBuf>,
        store: Arc<dyn RunStore>,
        agent: Arc<dyn AgentAdapter>,
        evaluators: EvaluatorSet,
    ) -> Self {
        Self {
            suites_root: suites_root.into(),
            store,
            agent,
            evaluators,
            warmup_factory: None,
            mcp_servers: Vec::new(),
            skip_warmup: false,
            judge_only: false,
        }
    }

    /// MCP servers whose tools join the agent's tool set, typically from a
    /// specialist template's dependency list.
    pub fn with_mcp_servers(mut self, servers: Vec<McpServerConfig>) -> Self {
        self.mcp_servers = servers;
        self
    }

    pub fn with_warmup_factory(mut self, factory: WarmupAdapterFactory) -> Self {
        self.warmup_factory = Some(factory);
        self
    }

    /// Skips the warmup stage; used by batch runs that warm scenarios up
    /// front.
    pub fn with_skip_warmup(mut self, skip: bool) -> Self {
        self.skip_warmup = skip;
        self
    }

    /// Runs only the LLM judge in the evaluation stage.
    pub fn with_judge_only(mut self, judge_only: bool) -> Self {
        self.judge_only = judge_only;
        self
    }

    /// Executes one combination end to end and persists its record.
    ///
    /// Stage failures come back as an `Ok` record in `Failed` status; an
    /// `Err` here means the run store itself is unusable.
    pub async fn execute_run(
        &self,
        request: &RunRequest,
    ) -> Result<RunOutcome, crate::error::StorageError> {
        let mut run = RunRecord::started(
            request.batch_id.clone(),
            &request.suite,
            &request.scenario,
            &request.tier,
            &request.agent,
            &request.model,
        );
        info!(
            run_id = %run.id,
            suite = %request.suite,
            scenario = %request.scenario,
            tier = %request.tier,
            model = %request.model,
            "run started"
        );
        self.store.create_run(&run).await?;

        let start = Instant::now();
        let mut artifacts = RunArtifacts::default();

        match self.run_stages(run.id, request, &mut artifacts).await {
            Ok(()) => {
                if let Some(outcome) = artifacts.evaluation.take() {
                    run.status = RunStatus::Completed;
                    run.weighted_total = Some(outcome.totals.weighted);
                    run.is_successful = Some(outcome.success.is_successful);
                    run.success_metric = Some(outcome.success.success_metric);
                    run.scores = Some(outcome.card);
                    self.store
                        .append_evaluations(run.id, &outcome.details)
                        .await?;
                }
            }
            Err(failure) => {
                warn!(
                    run_id = %run.id,
                    stage = failure.stage,
                    error = %failure.message,
                    "run failed"
                );
                run.status = RunStatus::Failed;
                run.failure_stage = Some(failure.stage.to_string());
                run.error = Some(failure.message);
            }
        }

        let mut telemetry = None;
        if let Some(response) = &artifacts.response {
            let snapshot = RunTelemetry {
                input_tokens: response.input_tokens,
                output_tokens: response.output_tokens,
                cost_usd: response.cost_usd,
                tool_calls: response.tool_calls,
                duration_ms: start.elapsed().as_millis() as u64,
                workspace: artifacts
                    .workspace
                    .as_ref()
                    .map(|p| p.display().to_string()),
                prompt_sent: artifacts.prompt.clone(),
            };
            self.store.append_telemetry(run.id, &snapshot).await?;
            telemetry = Some(snapshot);
        }

        run.finished_at = Some(Utc::now());
        self.store.complete_run(&run).await?;
        info!(
            run_id = %run.id,
            status = run.status.as_str(),
            score = run.weighted_total.unwrap_or(0.0),
            "run persisted"
        );
        Ok(RunOutcome {
            record: run,
            telemetry,
        })
    }

    async fn run_stages(
        &self,
        run_id: Uuid,
        request: &RunRequest,
        artifacts: &mut RunArtifacts,
    ) -> Result<(), StageFailure> {
        // Setup
        let scenario = Scenario::load(&self.suites_root, &request.suite, &request.scenario)
            .map_err(|e| StageFailure::new("setup", e.to_string()))?;
        let tier_prompt = scenario
            .tier_prompt(&request.tier)
            .map_err(|e| StageFailure::new("setup", e.to_string()))?;
        artifacts.prompt = tier_prompt.clone();

        let watchdog = Watchdog::arm(scenario.config.timeout(), run_id);

        // Warmup
        if self.skip_warmup {
            debug!(run_id = %run_id, "warmup stage skipped");
        } else {
            let outcome = match &self.warmup_factory {
                Some(factory) => {
                    let factory = factory.clone();
                    warmup::execute_warmup(&scenario, move |model| factory(model)).await
                }
                None => {
                    let agent = self.agent.clone();
                    warmup::execute_warmup(&scenario, move |_| Ok(agent.clone())).await
                }
            };
            if !outcome.success {
                return Err(StageFailure::new(
                    "warmup",
                    outcome
                        .error
                        .unwrap_or_else(|| "warmup failed".to_string()),
                ));
            }
        }
        watchdog.check()?;

        // Workspace
        if scenario.config.is_artifact_based() {
            debug!(run_id = %run_id, "artifact scenario; workspace stage skipped");
        } else {
            artifacts.workspace = workspace::prepare_workspace(&scenario, &run_id.to_string())
                .map_err(|e| StageFailure::new("workspace", e.to_string()))?;
        }
        watchdog.check()?;

        // Agent
        let mut tools = Vec::new();
        let mut handlers = ToolHandlerMap::new();
        if let Some(ws) = &artifacts.workspace {
            let (workspace_tools, workspace_handlers) = workspace_tool_set(ws);
            tools.extend(workspace_tools);
            handlers.extend(workspace_handlers);
        }
        if let Some(oracle) = scenario.oracle_path() {
            tools.push(OracleTool::definition());
            handlers.insert("ask_oracle".to_string(), Arc::new(OracleTool::new(oracle)));
        }
        let mcp_set = if self.mcp_servers.is_empty() {
            None
        } else {
            let set = McpToolSet::resolve(&self.mcp_servers)
                .await
                .map_err(|e| StageFailure::new("agent", format!("MCP setup failed: {}", e)))?;
            tools.extend(set.definitions().to_vec());
            handlers.extend(set.handlers());
            Some(set)
        };

        let mut agent_request = AgentRequest::new(vec![ChatMessage::user(tier_prompt)])
            .with_tools(tools)
            .with_handlers(handlers);
        if let Some(ws) = &artifacts.workspace {
            agent_request = agent_request.with_workspace_dir(ws);
        }

        let send_result = self.agent.send(agent_request).await;
        // Child MCP servers must not outlive the agent turn, success or not.
        if let Some(set) = &mcp_set {
            set.release().await;
        }
        let response =
            send_result.map_err(|e| StageFailure::new("agent", e.to_string()))?;
        debug!(
            run_id = %run_id,
            tool_calls = response.tool_calls,
            tokens = response.input_tokens + response.output_tokens,
            "agent stage finished"
        );
        artifacts.response = Some(response);
        watchdog.check()?;

        // Validation
        if scenario.config.is_artifact_based() {
            debug!(run_id = %run_id, "artifact scenario; validation stage skipped");
        } else if let Some(ws) = &artifacts.workspace {
            let timeout = Duration::from_secs(
                scenario
                    .config
                    .validation_timeout_secs
                    .unwrap_or(DEFAULT_VALIDATION_TIMEOUT_SECS),
            );
            for command in &scenario.config.validation {
                let command_start = Instant::now();
                let output = run_shell(command, ws, timeout).await.map_err(|e| {
                    StageFailure::new(
                        "validation",
                        format!("failed to spawn '{}': {}", command, e),
                    )
                })?;
                if !output.success() {
                    warn!(
                        run_id = %run_id,
                        command = %command,
                        exit_code = output.exit_code,
                        "validation command failed"
                    );
                }
                artifacts.command_log.push(CommandLogEntry {
                    command: command.clone(),
                    exit_code: output.exit_code,
                    stdout: truncate_output(&output.stdout, VALIDATION_OUTPUT_CHARS),
                    stderr: truncate_output(&output.stderr, VALIDATION_OUTPUT_CHARS),
                    duration_ms: command_start.elapsed().as_millis() as u64,
                });
            }
        } else if !scenario.config.validation.is_empty() {
            warn!(
                run_id = %run_id,
                "validation commands configured but scenario has no workspace; skipping"
            );
        }
        watchdog.check()?;

        // Evaluation
        let judge_only = self.judge_only || scenario.config.is_artifact_based();
        let final_content = artifacts
            .response
            .as_ref()
            .map(|r| r.content.clone())
            .unwrap_or_default();
        let tool_calls = artifacts.response.as_ref().map(|r| r.tool_calls).unwrap_or(0);
        let ctx = EvaluationContext {
            scenario: &scenario,
            tier_prompt: &artifacts.prompt,
            final_content: &final_content,
            tool_calls,
            workspace: artifacts.workspace.as_deref(),
            command_log: &artifacts.command_log,
        };
        let (card, details) = self.evaluators.evaluate(&ctx, judge_only).await;
        let totals = compute_weighted_totals(&card, &scenario.config);
        let success = calculate_success(&artifacts.command_log, &card);
        artifacts.evaluation = Some(EvaluationOutcome {
            card,
            details,
            totals,
            success,
        });
        watchdog.check()?;

        Ok(())
    }
}

#[derive(Default)]
struct RunArtifacts {
    workspace: Option<PathBuf>,
    prompt: String,
    response: Option<AgentResponse>,
    command_log: Vec<CommandLogEntry>,
    evaluation: Option<EvaluationOutcome>,
}

struct EvaluationOutcome {
    card: ScoreCard,
    details: Vec<EvaluationDetail>,
    totals: WeightedTotals,
    success: SuccessReport,
}

struct StageFailure {
    stage: &'static str,
    message: String,
}

impl StageFailure {
    fn new(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// Wall-clock budget monitor. Fires at most once; the spawned timer is
/// aborted when the watchdog drops, so no timer outlives its run.
struct Watchdog {
    handle: JoinHandle<()>,
    fired: Arc<AtomicBool>,
    budget: Duration,
}

impl Watchdog {
    fn arm(budget: Duration, run_id: Uuid) -> Self {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            flag.store(true, Ordering::SeqCst);
            warn!(run_id = %run_id, "run exceeded its time budget");
        });
        Self {
            handle,
            fired,
            budget,
        }
    }

    fn check(&self) -> Result<(), StageFailure> {
        if self.fired.load(Ordering::SeqCst) {
            Err(StageFailure::new(
                "timeout",
                format!("run exceeded its {}s budget", self.budget.as_secs()),
            ))
        } else {
            Ok(())
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
