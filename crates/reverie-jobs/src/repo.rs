//! Durable job state and result-delivery bookkeeping in Postgres.
//!
//! One `jobs` table tracks the lifecycle of every kind, shapes-import
//! included. The stuck sweeper fails anything active for over an hour so
//! the user can retry after a worker restart.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::{PgPool, Row};
use tokio::sync::watch;
use tracing::{info, warn};

use reverie_core::types::{Job, JobState};
use reverie_core::validate::validate_days_to_keep;

use crate::error::{JobError, Result};
use crate::types::ResultStatus;

/// Error recorded on jobs failed by the stuck sweeper. Replayable: the user
/// can resubmit.
pub const STUCK_JOB_ERROR: &str = "Job timed out — worker may have restarted.";
/// Jobs active longer than this are considered stuck.
const STUCK_AFTER_SECS: i64 = 3600;
/// Stuck jobs failed per sweep.
const STUCK_BATCH: i64 = 500;
/// Sweep cadence.
const STUCK_SWEEP_SECS: u64 = 300;

/// Outcome of a delivery confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Confirmed,
    /// Second confirmation for the same job — a no-op.
    AlreadyConfirmed,
}

pub struct JobRepo {
    pool: PgPool,
}

impl JobRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the jobs and job_results tables. Idempotent.
    pub async fn init_db(pool: &PgPool) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS jobs (
                id          TEXT PRIMARY KEY,
                request_id  TEXT NOT NULL,
                kind        TEXT NOT NULL,
                state       TEXT NOT NULL,
                error       TEXT,
                created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS jobs_state_idx ON jobs (state, updated_at)")
            .execute(pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS job_results (
                job_id        TEXT PRIMARY KEY,
                request_id    TEXT NOT NULL,
                status        TEXT NOT NULL,
                body          JSONB NOT NULL,
                created_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
                delivered_at  TIMESTAMPTZ
            )",
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record a freshly planned job as queued.
    pub async fn insert_job(&self, job: &Job, request_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO jobs (id, request_id, kind, state, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $5)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&job.id)
        .bind(request_id)
        .bind(job.kind.to_string())
        .bind(job.state.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Move a job forward through its lifecycle. Illegal edges are
    /// rejected — states never move backwards.
    pub async fn mark_state(
        &self,
        job_id: &str,
        next: JobState,
        error: Option<&str>,
    ) -> Result<()> {
        let row = sqlx::query("SELECT state FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        let current: String = row.try_get("state")?;
        let current: JobState = current
            .parse()
            .map_err(|e: String| JobError::Validation(format!("bad stored state: {e}")))?;

        if !current.can_transition(next) {
            return Err(JobError::IllegalTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }

        sqlx::query(
            "UPDATE jobs SET state = $2, error = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(job_id)
        .bind(next.to_string())
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Store a completed generation result as pending delivery.
    pub async fn record_result(
        &self,
        job_id: &str,
        request_id: &str,
        body: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO job_results (job_id, request_id, status, body, created_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (job_id) DO UPDATE SET body = $4",
        )
        .bind(job_id)
        .bind(request_id)
        .bind(ResultStatus::PendingDelivery.to_string())
        .bind(body)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// PENDING_DELIVERY → DELIVERED. Idempotent: a second call reports
    /// `AlreadyConfirmed` and changes nothing; an unknown job id is an
    /// error.
    pub async fn confirm_delivery(&self, job_id: &str) -> Result<DeliveryOutcome> {
        let row = sqlx::query("SELECT status FROM job_results WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        let status: String = row.try_get("status")?;

        if status == ResultStatus::Delivered.to_string() {
            return Ok(DeliveryOutcome::AlreadyConfirmed);
        }

        sqlx::query(
            "UPDATE job_results SET status = $2, delivered_at = $3 WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(ResultStatus::Delivered.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        // Best-effort lifecycle edge; results may outlive their job rows.
        if let Err(e) = self.mark_state(job_id, JobState::Delivered, None).await {
            warn!(job_id, err = %e, "job row not advanced to delivered");
        }
        info!(job_id, "delivery confirmed");
        Ok(DeliveryOutcome::Confirmed)
    }

    /// Fail jobs stuck in `active` for over an hour, 500 at a time.
    /// Returns how many were failed.
    pub async fn fail_stuck_jobs(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'failed', error = $1, updated_at = now()
             WHERE id IN (
                 SELECT id FROM jobs
                 WHERE state = 'active' AND updated_at < now() - ($2 || ' seconds')::interval
                 ORDER BY updated_at
                 LIMIT $3
             )",
        )
        .bind(STUCK_JOB_ERROR)
        .bind(STUCK_AFTER_SECS.to_string())
        .bind(STUCK_BATCH)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete delivered results older than `days_to_keep` days.
    /// The bound is validated to [1, 365] before any delete runs.
    pub async fn cleanup_delivered(&self, days_to_keep: &str) -> Result<u64> {
        let days = validate_days_to_keep(days_to_keep).map_err(JobError::Validation)?;
        let result = sqlx::query(
            "DELETE FROM job_results
             WHERE status = 'DELIVERED'
               AND delivered_at < now() - ($1 || ' days')::interval",
        )
        .bind(days.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Delivered results are kept this many days before the sweeper deletes
/// them.
const DEFAULT_DAYS_TO_KEEP: &str = "30";

/// Periodic stuck-job sweeper. Also prunes old delivered results.
pub async fn run_stuck_job_sweeper(repo: Arc<JobRepo>, mut shutdown: watch::Receiver<bool>) {
    info!("stuck-job sweeper started");
    let mut interval = tokio::time::interval(Duration::from_secs(STUCK_SWEEP_SECS));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match repo.fail_stuck_jobs().await {
                    Ok(0) => {}
                    Ok(n) => warn!(failed = n, "stuck jobs failed by sweeper"),
                    Err(e) => warn!(err = %e, "stuck-job sweep failed"),
                }
                if let Err(e) = repo.cleanup_delivered(DEFAULT_DAYS_TO_KEEP).await {
                    warn!(err = %e, "delivered-result cleanup failed");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("stuck-job sweeper shutting down");
                    break;
                }
            }
        }
    }
}
