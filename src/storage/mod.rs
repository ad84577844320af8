//! Run and batch persistence.
//!
//! Every executed combination produces exactly one [`RunRecord`]; batches
//! group runs and carry aggregate statistics computed after all their runs
//! finish. The [`RunStore`] trait keeps the orchestrator independent of the
//! backend: [`PgRunStore`] persists to Postgres, [`InMemoryRunStore`] backs
//! tests and `--no-db` operation.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageError;
use crate::evaluation::EvaluationDetail;
use crate::scoring::ScoreCard;

pub use memory::InMemoryRunStore;
pub use postgres::PgRunStore;

/// Lifecycle state of a run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            _ => RunStatus::Running,
        }
    }
}

/// One benchmark run of one combination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub batch_id: Option<String>,
    pub suite: String,
    pub scenario: String,
    pub tier: String,
    pub agent: String,
    pub model: String,
    pub status: RunStatus,
    /// Stage that failed, for failed runs ("warmup", "agent", "timeout", …).
    pub failure_stage: Option<String>,
    pub error: Option<String>,
    pub scores: Option<ScoreCard>,
    pub weighted_total: Option<f64>,
    pub is_successful: Option<bool>,
    pub success_metric: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// A fresh record in `Running` state.
    pub fn started(
        batch_id: Option<String>,
        suite: impl Into<String>,
        scenario: impl Into<String>,
        tier: impl Into<String>,
        agent: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            batch_id,
            suite: suite.into(),
            scenario: scenario.into(),
            tier: tier.into(),
            agent: agent.into(),
            model: model.into(),
            status: RunStatus::Running,
            failure_stage: None,
            error: None,
            scores: None,
            weighted_total: None,
            is_successful: None,
            success_metric: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Per-run telemetry captured from the agent interaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunTelemetry {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub tool_calls: u32,
    pub duration_ms: u64,
    pub workspace: Option<String>,
    /// The verbatim prompt the agent received, for replay and audits.
    pub prompt_sent: String,
}

/// One batch of runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    pub id: String,
    pub suite: String,
    pub created_at: DateTime<Utc>,
    /// Free-form description of the combination matrix.
    pub metadata: serde_json::Value,
}

/// Aggregate statistics over a batch's runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_runs: i64,
    pub completed_runs: i64,
    pub failed_runs: i64,
    pub successful_runs: i64,
    pub avg_weighted_score: Option<f64>,
}

/// How many runs failed in a given stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailureCount {
    pub stage: String,
    pub count: i64,
}

/// Async record store for runs and batches.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Registers a run in `Running` state.
    async fn create_run(&self, run: &RunRecord) -> Result<(), StorageError>;

    /// Finalizes a run. Called exactly once per run; upserts so a crashed
    /// earlier attempt never blocks completion.
    async fn complete_run(&self, run: &RunRecord) -> Result<(), StorageError>;

    /// Attaches per-evaluator results to a run.
    async fn append_evaluations(
        &self,
        run_id: Uuid,
        details: &[EvaluationDetail],
    ) -> Result<(), StorageError>;

    /// Attaches agent telemetry to a run.
    async fn append_telemetry(
        &self,
        run_id: Uuid,
        telemetry: &RunTelemetry,
    ) -> Result<(), StorageError>;

    async fn create_batch(&self, batch: &BatchRecord) -> Result<(), StorageError>;

    /// Stores final statistics for a batch.
    async fn complete_batch(&self, batch_id: &str, stats: &BatchStats)
        -> Result<(), StorageError>;

    /// Computes statistics over a batch's runs.
    async fn batch_stats(&self, batch_id: &str) -> Result<BatchStats, StorageError>;

    /// Failed-run counts grouped by failure stage.
    async fn failure_breakdown(
        &self,
        batch_id: &str,
    ) -> Result<Vec<StageFailureCount>, StorageError>;
}
