//! In-memory run store for tests and database-less operation.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StorageError;
use crate::evaluation::EvaluationDetail;
use crate::scoring::round4;
use crate::storage::{
    BatchRecord, BatchStats, RunRecord, RunStatus, RunStore, RunTelemetry, StageFailureCount,
};

/// [`RunStore`] over process-local maps. Mirrors the Postgres store's
/// semantics closely enough that orchestrator tests run against it.
#[derive(Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<Uuid, RunRecord>>,
    batches: RwLock<HashMap<String, (BatchRecord, Option<BatchStats>)>>,
    evaluations: RwLock<HashMap<Uuid, Vec<EvaluationDetail>>>,
    telemetry: RwLock<HashMap<Uuid, RunTelemetry>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one run, test introspection.
    pub async fn run(&self, run_id: Uuid) -> Option<RunRecord> {
        self.runs.read().await.get(&run_id).cloned()
    }

    pub async fn run_count(&self) -> usize {
        self.runs.read().await.len()
    }

    pub async fn evaluations(&self, run_id: Uuid) -> Vec<EvaluationDetail> {
        self.evaluations
            .read()
            .await
            .get(&run_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn telemetry(&self, run_id: Uuid) -> Option<RunTelemetry> {
        self.telemetry.read().await.get(&run_id).cloned()
    }

    pub async fn batch_final_stats(&self, batch_id: &str) -> Option<BatchStats> {
        self.batches
            .read()
            .await
            .get(batch_id)
            .and_then(|(_, stats)| stats.clone())
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create_run(&self, run: &RunRecord) -> Result<(), StorageError> {
        self.runs.write().await.insert(run.id, run.clone());
        Ok(())
    }

    async fn complete_run(&self, run: &RunRecord) -> Result<(), StorageError> {
        let mut record = run.clone();
        if record.finished_at.is_none() {
            record.finished_at = Some(Utc::now());
        }
        self.runs.write().await.insert(record.id, record);
        Ok(())
    }

    async fn append_evaluations(
        &self,
        run_id: Uuid,
        details: &[EvaluationDetail],
    ) -> Result<(), StorageError> {
        let mut evaluations = self.evaluations.write().await;
        let entry = evaluations.entry(run_id).or_default();
        for detail in details {
            entry.retain(|d| d.evaluator != detail.evaluator);
            entry.push(detail.clone());
        }
        Ok(())
    }

    async fn append_telemetry(
        &self,
        run_id: Uuid,
        telemetry: &RunTelemetry,
    ) -> Result<(), StorageError> {
        if !self.runs.read().await.contains_key(&run_id) {
            return Err(StorageError::RunNotFound(run_id.to_string()));
        }
        self.telemetry.write().await.insert(run_id, telemetry.clone());
        Ok(())
    }

    async fn create_batch(&self, batch: &BatchRecord) -> Result<(), StorageError> {
        self.batches
            .write()
            .await
            .entry(batch.id.clone())
            .or_insert((batch.clone(), None));
        Ok(())
    }

    async fn complete_batch(
        &self,
        batch_id: &str,
        stats: &BatchStats,
    ) -> Result<(), StorageError> {
        let mut batches = self.batches.write().await;
        let Some(entry) = batches.get_mut(batch_id) else {
            return Err(StorageError::BatchNotFound(batch_id.to_string()));
        };
        entry.1 = Some(stats.clone());
        Ok(())
    }

    async fn batch_stats(&self, batch_id: &str) -> Result<BatchStats, StorageError> {
        let runs = self.runs.read().await;
        let in_batch: Vec<&RunRecord> = runs
            .values()
            .filter(|run| run.batch_id.as_deref() == Some(batch_id))
            .collect();

        let completed: Vec<&&RunRecord> = in_batch
            .iter()
            .filter(|run| run.status == RunStatus::Completed)
            .collect();
        let scored: Vec<f64> = completed
            .iter()
            .filter_map(|run| run.weighted_total)
            .collect();
        let avg_weighted_score = if scored.is_empty() {
            None
        } else {
            Some(round4(scored.iter().sum::<f64>() / scored.len() as f64))
        };

        Ok(BatchStats {
            total_runs: in_batch.len() as i64,
            completed_runs: completed.len() as i64,
            failed_runs: in_batch
                .iter()
                .filter(|run| run.status == RunStatus::Failed)
                .count() as i64,
            successful_runs: in_batch
                .iter()
                .filter(|run| run.is_successful == Some(true))
                .count() as i64,
            avg_weighted_score,
        })
    }

    async fn failure_breakdown(
        &self,
        batch_id: &str,
    ) -> Result<Vec<StageFailureCount>, StorageError> {
        let runs = self.runs.read().await;
        let mut by_stage: HashMap<String, i64> = HashMap::new();
        for run in runs.values() {
            if run.batch_id.as_deref() != Some(batch_id) || run.status != RunStatus::Failed {
                continue;
            }
            let stage = run
                .failure_stage
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            *by_stage.entry(stage).or_insert(0) += 1;
        }

        let mut breakdown: Vec<StageFailureCount> = by_stage
            .into_iter()
            .map(|(stage, count)| StageFailureCount { stage, count })
            .collect();
        breakdown.sort_by(|a, b| b.count.cmp(&a.count).then(a.stage.cmp(&b.stage)));
        Ok(breakdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::ScoreCard;
    use std::collections::HashMap as StdHashMap;

    fn completed_run(batch: &str, weighted: f64, successful: bool) -> RunRecord {
        let mut run = RunRecord::started(
            Some(batch.to_string()),
            "suite",
            "scn",
            "junior",
            "openrouter",
            "test/model",
        );
        run.status = RunStatus::Completed;
        run.weighted_total = Some(weighted);
        run.is_successful = Some(successful);
        run.scores = Some(ScoreCard::from_scores(&StdHashMap::new()));
        run.finished_at = Some(Utc::now());
        run
    }

    fn failed_run(batch: &str, stage: &str) -> RunRecord {
        let mut run = RunRecord::started(
            Some(batch.to_string()),
            "suite",
            "scn",
            "junior",
            "openrouter",
            "test/model",
        );
        run.status = RunStatus::Failed;
        run.failure_stage = Some(stage.to_string());
        run.error = Some("boom".to_string());
        run
    }

    #[tokio::test]
    async fn test_complete_run_upserts() {
        let store = InMemoryRunStore::new();
        let mut run = RunRecord::started(None, "suite", "scn", "junior", "openrouter", "m");
        store.create_run(&run).await.unwrap();
        assert_eq!(store.run(run.id).await.unwrap().status, RunStatus::Running);

        run.status = RunStatus::Completed;
        run.weighted_total = Some(7.5);
        store.complete_run(&run).await.unwrap();

        let stored = store.run(run.id).await.unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
        assert_eq!(stored.weighted_total, Some(7.5));
        assert!(stored.finished_at.is_some());
        assert_eq!(store.run_count().await, 1);
    }

    #[tokio::test]
    async fn test_batch_stats_aggregates() {
        let store = InMemoryRunStore::new();
        let batch = BatchRecord {
            id: "b1".to_string(),
            suite: "suite".to_string(),
            created_at: Utc::now(),
            metadata: serde_json::json!({"combinations": 3}),
        };
        store.create_batch(&batch).await.unwrap();

        store
            .complete_run(&completed_run("b1", 8.0, true))
            .await
            .unwrap();
        store
            .complete_run(&completed_run("b1", 6.0, false))
            .await
            .unwrap();
        store.complete_run(&failed_run("b1", "agent")).await.unwrap();
        // A run in another batch must not leak in.
        store
            .complete_run(&completed_run("b2", 1.0, true))
            .await
            .unwrap();

        let stats = store.batch_stats("b1").await.unwrap();
        assert_eq!(stats.total_runs, 3);
        assert_eq!(stats.completed_runs, 2);
        assert_eq!(stats.failed_runs, 1);
        assert_eq!(stats.successful_runs, 1);
        assert_eq!(stats.avg_weighted_score, Some(7.0));

        store.complete_batch("b1", &stats).await.unwrap();
        assert_eq!(store.batch_final_stats("b1").await, Some(stats));
    }

    #[tokio::test]
    async fn test_failure_breakdown_groups_by_stage() {
        let store = InMemoryRunStore::new();
        store.complete_run(&failed_run("b1", "agent")).await.unwrap();
        store.complete_run(&failed_run("b1", "agent")).await.unwrap();
        store.complete_run(&failed_run("b1", "warmup")).await.unwrap();

        let breakdown = store.failure_breakdown("b1").await.unwrap();
        assert_eq!(
            breakdown,
            vec![
                StageFailureCount {
                    stage: "agent".to_string(),
                    count: 2
                },
                StageFailureCount {
                    stage: "warmup".to_string(),
                    count: 1
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_telemetry_requires_existing_run() {
        let store = InMemoryRunStore::new();
        let telemetry = RunTelemetry {
            prompt_sent: "do the thing".to_string(),
            ..Default::default()
        };

        let missing = store.append_telemetry(Uuid::new_v4(), &telemetry).await;
        assert!(matches!(missing, Err(StorageError::RunNotFound(_))));

        let run = RunRecord::started(None, "s", "c", "t", "a", "m");
        store.create_run(&run).await.unwrap();
        store.append_telemetry(run.id, &telemetry).await.unwrap();
        assert_eq!(
            store.telemetry(run.id).await.unwrap().prompt_sent,
            "do the thing"
        );
    }

    #[tokio::test]
    async fn test_evaluations_replace_per_evaluator() {
        let store = InMemoryRunStore::new();
        let run = RunRecord::started(None, "s", "c", "t", "a", "m");
        store.create_run(&run).await.unwrap();

        let first = EvaluationDetail {
            evaluator: "llm_judge".to_string(),
            score: 0.5,
            detail: None,
            error: None,
        };
        let second = EvaluationDetail {
            evaluator: "llm_judge".to_string(),
            score: 0.9,
            detail: Some("revised".to_string()),
            error: None,
        };
        store.append_evaluations(run.id, &[first]).await.unwrap();
        store.append_evaluations(run.id, &[second]).await.unwrap();

        let stored = store.evaluations(run.id).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].score, 0.9);
    }

    #[tokio::test]
    async fn test_complete_unknown_batch_errors() {
        let store = InMemoryRunStore::new();
        let result = store.complete_batch("ghost", &BatchStats::default()).await;
        assert!(matches!(result, Err(StorageError::BatchNotFound(_))));
    }
}
