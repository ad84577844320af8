//! Postgres-backed run store.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::error::StorageError;
use crate::evaluation::EvaluationDetail;
use crate::storage::{
    BatchRecord, BatchStats, RunRecord, RunStore, RunTelemetry, StageFailureCount,
};

/// Issued statement-by-statement at connect time. Additive schema changes
/// only; existing installations keep their data.
const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS benchmark_runs (
        id              UUID PRIMARY KEY,
        batch_id        TEXT,
        suite           TEXT NOT NULL,
        scenario        TEXT NOT NULL,
        tier            TEXT NOT NULL,
        agent           TEXT NOT NULL,
        model           TEXT NOT NULL,
        status          TEXT NOT NULL,
        failure_stage   TEXT,
        error           TEXT,
        scores          JSONB,
        weighted_total  DOUBLE PRECISION,
        is_successful   BOOLEAN,
        success_metric  DOUBLE PRECISION,
        telemetry       JSONB,
        started_at      TIMESTAMPTZ NOT NULL,
        finished_at     TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS benchmark_batches (
        id          TEXT PRIMARY KEY,
        suite       TEXT NOT NULL,
        metadata    JSONB,
        stats       JSONB,
        created_at  TIMESTAMPTZ NOT NULL,
        finished_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS run_evaluations (
        run_id     UUID NOT NULL,
        evaluator  TEXT NOT NULL,
        score      DOUBLE PRECISION NOT NULL,
        detail     TEXT,
        error      TEXT,
        PRIMARY KEY (run_id, evaluator)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_runs_batch ON benchmark_runs(batch_id)",
];

/// Run store over a Postgres connection pool.
pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    /// Connects and ensures the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        info!("run store connected");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn create_run(&self, run: &RunRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO benchmark_runs (
                id, batch_id, suite, scenario, tier, agent, model, status, started_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(run.id)
        .bind(&run.batch_id)
        .bind(&run.suite)
        .bind(&run.scenario)
        .bind(&run.tier)
        .bind(&run.agent)
        .bind(&run.model)
        .bind(run.status.as_str())
        .bind(run.started_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_run(&self, run: &RunRecord) -> Result<(), StorageError> {
        let scores_json = match &run.scores {
            Some(scores) => Some(serde_json::to_value(scores)?),
            None => None,
        };

        sqlx::query(
            r#"
            INSERT INTO benchmark_runs (
                id, batch_id, suite, scenario, tier, agent, model, status,
                failure_stage, error, scores, weighted_total, is_successful,
                success_metric, started_at, finished_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                failure_stage = EXCLUDED.failure_stage,
                error = EXCLUDED.error,
                scores = EXCLUDED.scores,
                weighted_total = EXCLUDED.weighted_total,
                is_successful = EXCLUDED.is_successful,
                success_metric = EXCLUDED.success_metric,
                finished_at = EXCLUDED.finished_at
            "#,
        )
        .bind(run.id)
        .bind(&run.batch_id)
        .bind(&run.suite)
        .bind(&run.scenario)
        .bind(&run.tier)
        .bind(&run.agent)
        .bind(&run.model)
        .bind(run.status.as_str())
        .bind(&run.failure_stage)
        .bind(&run.error)
        .bind(&scores_json)
        .bind(run.weighted_total)
        .bind(run.is_successful)
        .bind(run.success_metric)
        .bind(run.started_at)
        .bind(run.finished_at.unwrap_or_else(Utc::now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_evaluations(
        &self,
        run_id: Uuid,
        details: &[EvaluationDetail],
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        for detail in details {
            sqlx::query(
                r#"
                INSERT INTO run_evaluations (run_id, evaluator, score, detail, error)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (run_id, evaluator) DO UPDATE SET
                    score = EXCLUDED.score,
                    detail = EXCLUDED.detail,
                    error = EXCLUDED.error
                "#,
            )
            .bind(run_id)
            .bind(&detail.evaluator)
            .bind(detail.score)
            .bind(&detail.detail)
            .bind(&detail.error)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn append_telemetry(
        &self,
        run_id: Uuid,
        telemetry: &RunTelemetry,
    ) -> Result<(), StorageError> {
        let telemetry_json = serde_json::to_value(telemetry)?;
        let result = sqlx::query("UPDATE benchmark_runs SET telemetry = $2 WHERE id = $1")
            .bind(run_id)
            .bind(&telemetry_json)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::RunNotFound(run_id.to_string()));
        }
        Ok(())
    }

    async fn create_batch(&self, batch: &BatchRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO benchmark_batches (id, suite, metadata, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&batch.id)
        .bind(&batch.suite)
        .bind(&batch.metadata)
        .bind(batch.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_batch(
        &self,
        batch_id: &str,
        stats: &BatchStats,
    ) -> Result<(), StorageError> {
        let stats_json = serde_json::to_value(stats)?;
        let result = sqlx::query(
            "UPDATE benchmark_batches SET stats = $2, finished_at = $3 WHERE id = $1",
        )
        .bind(batch_id)
        .bind(&stats_json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::BatchNotFound(batch_id.to_string()));
        }
        Ok(())
    }

    async fn batch_stats(&self, batch_id: &str) -> Result<BatchStats, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) FILTER (WHERE is_successful) AS successful,
                AVG(weighted_total) FILTER (WHERE status = 'completed') AS avg_score
            FROM benchmark_runs
            WHERE batch_id = $1
            "#,
        )
        .bind(batch_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(BatchStats {
            total_runs: row.get("total"),
            completed_runs: row.get("completed"),
            failed_runs: row.get("failed"),
            successful_runs: row.get("successful"),
            avg_weighted_score: row.get("avg_score"),
        })
    }

    async fn failure_breakdown(
        &self,
        batch_id: &str,
    ) -> Result<Vec<StageFailureCount>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT COALESCE(failure_stage, 'unknown') AS stage, COUNT(*) AS count
            FROM benchmark_runs
            WHERE batch_id = $1 AND status = 'failed'
            GROUP BY COALESCE(failure_stage, 'unknown')
            ORDER BY count DESC
            "#,
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| StageFailureCount {
                stage: row.get("stage"),
                count: row.get("count"),
            })
            .collect())
    }
}
