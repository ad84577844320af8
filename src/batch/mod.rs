//! Batch fan-out across a combination matrix.
//!
//! A batch expands a models manifest against every scenario and tier of a
//! suite, warms each scenario up front, then dispatches the combinations
//! with bounded concurrency. Every combination yields exactly one persisted
//! run record, including combinations whose shared warmup already failed.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{BatchError, StorageError};
use crate::evaluation::EvaluatorSet;
use crate::llm::AgentAdapter;
use crate::mcp::McpServerConfig;
use crate::orchestrator::{Orchestrator, RunRequest, WarmupAdapterFactory};
use crate::scenario::{self, Scenario};
use crate::storage::{BatchRecord, BatchStats, RunRecord, RunStatus, RunStore};
use crate::warmup;

/// An agent ready to run: the adapter, the model id it resolved, and any
/// MCP servers its specialist template declares.
pub struct BuiltAgent {
    pub adapter: Arc<dyn AgentAdapter>,
    pub model: String,
    pub mcp_servers: Vec<McpServerConfig>,
}

/// Builds the agent for one combination (vanilla model or
/// specialist-wrapped model).
pub type CombinationAdapterFactory =
    Arc<dyn Fn(&Combination) -> anyhow::Result<BuiltAgent> + Send + Sync>;

/// The models side of the combination matrix, loaded from YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsManifest {
    #[serde(default)]
    pub vanilla_models: Vec<String>,
    #[serde(default)]
    pub specialists: Vec<SpecialistEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialistEntry {
    pub name: String,
    #[serde(default)]
    pub models: Vec<String>,
}

impl ModelsManifest {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BatchError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(BatchError::ManifestNotFound(path.display().to_string()));
        }
        let raw = fs::read_to_string(path)?;
        let manifest: ModelsManifest =
            serde_yaml::from_str(&raw).map_err(|e| BatchError::ManifestParse {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        if manifest.vanilla_models.is_empty()
            && manifest.specialists.iter().all(|s| s.models.is_empty())
        {
            return Err(BatchError::EmptyManifest);
        }
        Ok(manifest)
    }
}

/// One cell of the matrix: scenario × tier × (specialist?) × model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combination {
    pub scenario: String,
    pub tier: String,
    pub specialist: Option<String>,
    pub model: String,
}

impl Combination {
    /// Agent name as the wrapped adapter would report it, usable before the
    /// adapter itself exists (failed-warmup records need it).
    pub fn agent_name(&self) -> String {
        match &self.specialist {
            Some(name) => format!("{}+openrouter", name),
            None => "openrouter".to_string(),
        }
    }
}

/// Concurrency scales with matrix size rather than being configured.
pub fn concurrency_for(combinations: usize) -> usize {
    match combinations {
        0..=5 => 2,
        6..=15 => 3,
        16..=30 => 5,
        _ => 8,
    }
}

/// Expands the manifest against the suite's scenarios and tiers.
///
/// Filters keep only the named scenarios/tiers when given. A scenario that
/// fails to load fails the expansion; broken suite configuration should
/// surface before any run starts.
pub fn expand_combinations(
    suites_root: impl AsRef<Path>,
    suite: &str,
    manifest: &ModelsManifest,
    scenario_filter: Option<&[String]>,
    tier_filter: Option<&[String]>,
) -> Result<Vec<Combination>, BatchError> {
    let suites_root = suites_root.as_ref();
    let mut scenarios = scenario::list_scenarios(suites_root, suite)?;
    if let Some(filter) = scenario_filter {
        scenarios.retain(|s| filter.iter().any(|f| f == s));
    }

    let mut combinations = Vec::new();
    for name in &scenarios {
        let scenario = Scenario::load(suites_root, suite, name)?;
        let mut tiers = scenario.tiers();
        if let Some(filter) = tier_filter {
            tiers.retain(|t| filter.iter().any(|f| f == t));
        }
        for tier in &tiers {
            for model in &manifest.vanilla_models {
                combinations.push(Combination {
                    scenario: name.clone(),
                    tier: tier.clone(),
                    specialist: None,
                    model: model.clone(),
                });
            }
            for specialist in &manifest.specialists {
                for model in &specialist.models {
                    combinations.push(Combination {
                        scenario: name.clone(),
                        tier: tier.clone(),
                        specialist: Some(specialist.name.clone()),
                        model: model.clone(),
                    });
                }
            }
        }
    }

    if combinations.is_empty() {
        return Err(BatchError::NoCombinations);
    }
    Ok(combinations)
}

/// Outcome of one batch, returned to the CLI for reporting and exit-code
/// decisions.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub batch_id: String,
    pub stats: BatchStats,
}

/// Runs a combination matrix against one suite.
pub struct BatchRunner {
    suites_root: PathBuf,
    store: Arc<dyn RunStore>,
    judge: Arc<dyn AgentAdapter>,
    adapter_factory: CombinationAdapterFactory,
    warmup_factory: WarmupAdapterFactory,
}

impl BatchRunner {
    pub fn new(
        suites_root: impl Into<PathBuf>,
        store: Arc<dyn RunStore>,
        judge: Arc<dyn AgentAdapter>,
        adapter_factory: CombinationAdapterFactory,
        warmup_factory: WarmupAdapterFactory,
    ) -> Self {
        Self {
            suites_root: suites_root.into(),
            store,
            judge,
            adapter_factory,
            warmup_factory,
        }
    }

    /// Executes every combination and persists one batch record.
    ///
    /// Per-run summary lines go to stdout as runs finish; batch statistics
    /// are aggregated from the store once all combinations are done.
    pub async fn execute(
        &self,
        suite: &str,
        combinations: Vec<Combination>,
    ) -> Result<BatchOutcome, BatchError> {
        let batch_id = format!("{}-{}", suite, &Uuid::new_v4().simple().to_string()[..8]);
        let scenarios: BTreeSet<&str> =
            combinations.iter().map(|c| c.scenario.as_str()).collect();
        let models: BTreeSet<&str> = combinations.iter().map(|c| c.model.as_str()).collect();
        let specialists: BTreeSet<&str> = combinations
            .iter()
            .filter_map(|c| c.specialist.as_deref())
            .collect();
        let record = BatchRecord {
            id: batch_id.clone(),
            suite: suite.to_string(),
            created_at: Utc::now(),
            metadata: serde_json::json!({
                "combinations": combinations.len(),
                "scenarios": scenarios,
                "models": models,
                "specialists": specialists,
            }),
        };
        self.store.create_batch(&record).await?;
        info!(
            batch_id = %batch_id,
            combinations = combinations.len(),
            "batch started"
        );

        let warmup_errors = self.warm_scenarios(suite, &combinations).await;

        let limit = concurrency_for(combinations.len());
        info!(concurrency = limit, "dispatching combinations");
        let semaphore = Arc::new(Semaphore::new(limit));
        let mut run_futures = Vec::with_capacity(combinations.len());
        for combo in combinations {
            let sem = semaphore.clone();
            let warmup_error = warmup_errors.get(&combo.scenario).cloned();
            let batch_id = batch_id.clone();
            run_futures.push(async move {
                let _permit = sem.acquire().await.unwrap();
                self.run_combination(suite, &batch_id, combo, warmup_error)
                    .await
            });
        }
        for result in futures::future::join_all(run_futures).await {
            if let Err(e) = result {
                // A store failure mid-batch still lets the rest finish;
                // surface it and keep aggregating what was persisted.
                warn!(error = %e, "combination could not be persisted");
            }
        }

        let stats = self.store.batch_stats(&batch_id).await?;
        self.store.complete_batch(&batch_id, &stats).await?;
        info!(
            batch_id = %batch_id,
            total = stats.total_runs,
            successful = stats.successful_runs,
            failed = stats.failed_runs,
            "batch finished"
        );
        Ok(BatchOutcome { batch_id, stats })
    }

    /// Runs each distinct scenario's warmup once, before any combination.
    ///
    /// Returns the scenarios whose warmup failed, mapped to the error; their
    /// combinations are persisted as failed without executing. Scenarios
    /// that fail to load are left out so the per-run setup stage reports
    /// them.
    async fn warm_scenarios(
        &self,
        suite: &str,
        combinations: &[Combination],
    ) -> HashMap<String, String> {
        let scenarios: BTreeSet<&str> =
            combinations.iter().map(|c| c.scenario.as_str()).collect();
        let mut errors = HashMap::new();
        for name in scenarios {
            let scenario = match Scenario::load(&self.suites_root, suite, name) {
                Ok(s) => s,
                Err(_) => continue,
            };
            if scenario.config.warmup.is_none() {
                continue;
            }
            info!(suite = suite, scenario = name, "running shared warmup");
            let factory = self.warmup_factory.clone();
            let outcome =
                warmup::execute_warmup(&scenario, move |model| factory(model)).await;
            if !outcome.success {
                let error = outcome
                    .error
                    .unwrap_or_else(|| "warmup failed".to_string());
                warn!(scenario = name, error = %error, "shared warmup failed");
                errors.insert(name.to_string(), error);
            }
        }
        errors
    }

    async fn run_combination(
        &self,
        suite: &str,
        batch_id: &str,
        combo: Combination,
        warmup_error: Option<String>,
    ) -> Result<RunRecord, StorageError> {
        if let Some(error) = warmup_error {
            let run = self
                .persist_failed(suite, batch_id, &combo, "warmup", error)
                .await?;
            println!("{}", summary_line(&run));
            return Ok(run);
        }

        let built = match (self.adapter_factory)(&combo) {
            Ok(built) => built,
            Err(e) => {
                let run = self
                    .persist_failed(
                        suite,
                        batch_id,
                        &combo,
                        "setup",
                        format!("could not build agent adapter: {}", e),
                    )
                    .await?;
                println!("{}", summary_line(&run));
                return Ok(run);
            }
        };

        let orchestrator = Orchestrator::new(
            self.suites_root.clone(),
            self.store.clone(),
            built.adapter,
            EvaluatorSet::standard(self.judge.clone()),
        )
        .with_mcp_servers(built.mcp_servers)
        .with_skip_warmup(true);

        let request = RunRequest {
            suite: suite.to_string(),
            scenario: combo.scenario.clone(),
            tier: combo.tier.clone(),
            agent: combo.agent_name(),
            model: combo.model.clone(),
            batch_id: Some(batch_id.to_string()),
        };
        let outcome = orchestrator.execute_run(&request).await?;
        println!("{}", summary_line(&outcome.record));
        Ok(outcome.record)
    }

    /// Persists a failed record for a combination that never ran.
    async fn persist_failed(
        &self,
        suite: &str,
        batch_id: &str,
        combo: &Combination,
        stage: &'static str,
        error: String,
    ) -> Result<RunRecord, StorageError> {
        let mut run = RunRecord::started(
            Some(batch_id.to_string()),
            suite,
            &combo.scenario,
            &combo.tier,
            &combo.agent_name(),
            &combo.model,
        );
        self.store.create_run(&run).await?;
        run.status = RunStatus::Failed;
        run.failure_stage = Some(stage.to_string());
        run.error = Some(error);
        run.finished_at = Some(Utc::now());
        self.store.complete_run(&run).await?;
        Ok(run)
    }
}

/// One compact line per run, shared by quiet single runs and batch output.
pub fn summary_line(run: &RunRecord) -> String {
    let target = format!("{}/{}/{}", run.suite, run.scenario, run.tier);
    let model = if run.agent == "openrouter" {
        run.model.clone()
    } else {
        format!("{} via {}", run.model, run.agent)
    };
    match run.status {
        RunStatus::Failed => {
            let stage = run.failure_stage.as_deref().unwrap_or("unknown");
            let error = one_line(run.error.as_deref().unwrap_or(""), 120);
            format!("fail  {}  {}  stage={}  {}", target, model, stage, error)
        }
        _ => {
            let tag = if run.is_successful.unwrap_or(false) {
                "pass"
            } else {
                "fail"
            };
            format!(
                "{}  {}  {}  score={:.2}  metric={:.2}",
                tag,
                target,
                model,
                run.weighted_total.unwrap_or(0.0),
                run.success_metric.unwrap_or(0.0),
            )
        }
    }
}

fn one_line(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let truncated: String = flat.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}
