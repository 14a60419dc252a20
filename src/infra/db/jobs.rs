use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{
    JobOutcome, JobStore, NewJobParams, RecoveryReport, RepoError, StaleArtifact,
};
use crate::domain::entities::{DomainLockRecord, JobRecord, WorkerHeartbeatRecord};
use crate::domain::types::{FailureCode, JobStatus, RenderMode};

use super::{SqliteStore, map_sqlx_error};

const JOB_COLUMNS: &str = "job_id, url, normalized_url, domain_key, render_mode, status, \
     attempts, max_retries, navigation_timeout_seconds, job_timeout_seconds, \
     max_domain_wait_seconds, metadata, error_code, error_message, created_at, \
     started_at, finished_at, artifact_path, deduplicated, submission_date";

#[derive(sqlx::FromRow)]
struct JobRow {
    job_id: String,
    url: String,
    normalized_url: String,
    domain_key: String,
    render_mode: String,
    status: String,
    attempts: i64,
    max_retries: i64,
    navigation_timeout_seconds: i64,
    job_timeout_seconds: i64,
    max_domain_wait_seconds: i64,
    metadata: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
    created_at: OffsetDateTime,
    started_at: Option<OffsetDateTime>,
    finished_at: Option<OffsetDateTime>,
    artifact_path: Option<String>,
    deduplicated: bool,
    submission_date: String,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = RepoError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&row.job_id).map_err(|_| {
            RepoError::from_persistence(format!("malformed job id `{}`", row.job_id))
        })?;

        let status = JobStatus::try_from(row.status.as_str()).map_err(|_| {
            RepoError::from_persistence(format!("unknown job status `{}`", row.status))
        })?;

        let render_mode = RenderMode::try_from(row.render_mode.as_str()).map_err(|_| {
            RepoError::from_persistence(format!("unknown render mode `{}`", row.render_mode))
        })?;

        let error_code = row
            .error_code
            .as_deref()
            .map(|code| {
                FailureCode::try_from(code).map_err(|_| {
                    RepoError::from_persistence(format!("unknown error code `{code}`"))
                })
            })
            .transpose()?;

        let metadata = row
            .metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|err| RepoError::from_persistence(format!("malformed metadata: {err}")))?;

        Ok(Self {
            id,
            url: row.url,
            normalized_url: row.normalized_url,
            domain_key: row.domain_key,
            render_mode,
            status,
            attempts: row.attempts as i32,
            max_retries: row.max_retries as i32,
            navigation_timeout_seconds: row.navigation_timeout_seconds,
            job_timeout_seconds: row.job_timeout_seconds,
            max_domain_wait_seconds: row.max_domain_wait_seconds,
            metadata,
            error_code,
            error_message: row.error_message,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            artifact_path: row.artifact_path,
            deduplicated: row.deduplicated,
            submission_date: row.submission_date,
        })
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn find_dedup(
        &self,
        normalized_url: &str,
        submission_date: &str,
    ) -> Result<Option<JobRecord>, RepoError> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE normalized_url = ? AND submission_date = ?"
        ))
        .bind(normalized_url)
        .bind(submission_date)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(JobRecord::try_from).transpose()
    }

    async fn insert_job(&self, params: NewJobParams) -> Result<JobRecord, RepoError> {
        let metadata_json = params
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| RepoError::InvalidInput {
                message: format!("metadata is not serializable: {err}"),
            })?;

        sqlx::query(
            "INSERT INTO jobs (job_id, url, normalized_url, domain_key, render_mode, status, \
             attempts, max_retries, navigation_timeout_seconds, job_timeout_seconds, \
             max_domain_wait_seconds, metadata, created_at, submission_date) \
             VALUES (?, ?, ?, ?, ?, 'queued', 0, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(params.id.to_string())
        .bind(&params.url)
        .bind(&params.normalized_url)
        .bind(&params.domain_key)
        .bind(params.render_mode.as_str())
        .bind(params.max_retries)
        .bind(params.navigation_timeout_seconds)
        .bind(params.job_timeout_seconds)
        .bind(params.max_domain_wait_seconds)
        .bind(metadata_json.as_deref())
        .bind(params.created_at)
        .bind(&params.submission_date)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(JobRecord {
            id: params.id,
            url: params.url,
            normalized_url: params.normalized_url,
            domain_key: params.domain_key,
            render_mode: params.render_mode,
            status: JobStatus::Queued,
            attempts: 0,
            max_retries: params.max_retries,
            navigation_timeout_seconds: params.navigation_timeout_seconds,
            job_timeout_seconds: params.job_timeout_seconds,
            max_domain_wait_seconds: params.max_domain_wait_seconds,
            metadata: params.metadata,
            error_code: None,
            error_message: None,
            created_at: params.created_at,
            started_at: None,
            finished_at: None,
            artifact_path: None,
            deduplicated: false,
            submission_date: params.submission_date,
        })
    }

    async fn claim_next(&self, now: OffsetDateTime) -> Result<Option<JobRecord>, RepoError> {
        let mut tx = self.pool().begin().await.map_err(map_sqlx_error)?;

        let candidates: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE status IN ('queued', 'waiting_domain_lock') \
             ORDER BY created_at, job_id"
        ))
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        for row in candidates {
            // Over-aged waiting jobs belong to the sweep, not the claimer.
            let waiting = row.status == JobStatus::WaitingDomainLock.as_str();
            if waiting {
                let waited = (now - row.created_at).whole_seconds();
                if waited > row.max_domain_wait_seconds {
                    continue;
                }
            }

            let lock_holder: Option<(String,)> =
                sqlx::query_as("SELECT held_by_job_id FROM domain_locks WHERE domain_key = ?")
                    .bind(&row.domain_key)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(map_sqlx_error)?;

            if lock_holder.is_none() {
                sqlx::query(
                    "INSERT INTO domain_locks (domain_key, held_by_job_id, acquired_at) \
                     VALUES (?, ?, ?)",
                )
                .bind(&row.domain_key)
                .bind(&row.job_id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;

                sqlx::query("UPDATE jobs SET status = 'running', started_at = ? WHERE job_id = ?")
                    .bind(now)
                    .bind(&row.job_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx_error)?;

                tx.commit().await.map_err(map_sqlx_error)?;

                let mut job = JobRecord::try_from(row)?;
                job.status = JobStatus::Running;
                job.started_at = Some(now);
                return Ok(Some(job));
            }

            if !waiting {
                sqlx::query("UPDATE jobs SET status = 'waiting_domain_lock' WHERE job_id = ?")
                    .bind(&row.job_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx_error)?;
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(None)
    }

    async fn sweep_expired_waiting(&self, now: OffsetDateTime) -> Result<u64, RepoError> {
        let waiting: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'waiting_domain_lock'"
        ))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let mut expired = 0;
        for row in waiting {
            let waited = (now - row.created_at).whole_seconds();
            if waited <= row.max_domain_wait_seconds {
                continue;
            }

            let result = sqlx::query(
                "UPDATE jobs SET status = 'failed', error_code = ?, error_message = ?, \
                 finished_at = ? WHERE job_id = ? AND status = 'waiting_domain_lock'",
            )
            .bind(FailureCode::DomainWaitTimeout.as_str())
            .bind(format!(
                "exceeded max domain wait time: {}s",
                row.max_domain_wait_seconds
            ))
            .bind(now)
            .bind(&row.job_id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

            expired += result.rows_affected();
        }

        Ok(expired)
    }

    async fn bump_attempt(&self, job_id: Uuid) -> Result<i32, RepoError> {
        let (attempts,): (i64,) = sqlx::query_as(
            "UPDATE jobs SET attempts = attempts + 1 WHERE job_id = ? RETURNING attempts",
        )
        .bind(job_id.to_string())
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepoError::NotFound)?;

        Ok(attempts as i32)
    }

    async fn finish_job(
        &self,
        job_id: Uuid,
        outcome: JobOutcome,
        finished_at: OffsetDateTime,
    ) -> Result<(), RepoError> {
        let mut tx = self.pool().begin().await.map_err(map_sqlx_error)?;
        let id = job_id.to_string();

        let current: Option<(String,)> = sqlx::query_as("SELECT status FROM jobs WHERE job_id = ?")
            .bind(&id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let (status,) = current.ok_or(RepoError::NotFound)?;
        let status = JobStatus::try_from(status.as_str())
            .map_err(|_| RepoError::from_persistence(format!("unknown job status `{status}`")))?;
        if status.is_terminal() {
            // No transition out of terminal; treat a repeated finish as settled.
            tx.commit().await.map_err(map_sqlx_error)?;
            return Ok(());
        }

        match outcome {
            JobOutcome::Succeeded { artifact_path } => {
                sqlx::query(
                    "UPDATE jobs SET status = 'succeeded', artifact_path = ?, \
                     error_code = NULL, error_message = NULL, finished_at = ? \
                     WHERE job_id = ?",
                )
                .bind(&artifact_path)
                .bind(finished_at)
                .bind(&id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            }
            JobOutcome::Failed { code, message } => {
                sqlx::query(
                    "UPDATE jobs SET status = 'failed', error_code = ?, error_message = ?, \
                     artifact_path = NULL, finished_at = ? WHERE job_id = ?",
                )
                .bind(code.as_str())
                .bind(&message)
                .bind(finished_at)
                .bind(&id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            }
        }

        sqlx::query("DELETE FROM domain_locks WHERE held_by_job_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn requeue_job(&self, job_id: Uuid) -> Result<(), RepoError> {
        let mut tx = self.pool().begin().await.map_err(map_sqlx_error)?;
        let id = job_id.to_string();

        let result = sqlx::query(
            "UPDATE jobs SET status = 'queued', started_at = NULL \
             WHERE job_id = ? AND status = 'running'",
        )
        .bind(&id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }

        sqlx::query("DELETE FROM domain_locks WHERE held_by_job_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<JobRecord>, RepoError> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?"))
                .bind(job_id.to_string())
                .fetch_optional(self.pool())
                .await
                .map_err(map_sqlx_error)?;

        row.map(JobRecord::try_from).transpose()
    }

    async fn get_domain_lock(
        &self,
        domain_key: &str,
    ) -> Result<Option<DomainLockRecord>, RepoError> {
        let row: Option<(String, String, OffsetDateTime)> = sqlx::query_as(
            "SELECT domain_key, held_by_job_id, acquired_at FROM domain_locks \
             WHERE domain_key = ?",
        )
        .bind(domain_key)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let Some((domain_key, held_by_job_id, acquired_at)) = row else {
            return Ok(None);
        };

        let held_by_job_id = Uuid::parse_str(&held_by_job_id).map_err(|_| {
            RepoError::from_persistence(format!("malformed lock holder `{held_by_job_id}`"))
        })?;

        Ok(Some(DomainLockRecord {
            domain_key,
            held_by_job_id,
            acquired_at,
        }))
    }

    async fn list_stale_artifacts(
        &self,
        cutoff: OffsetDateTime,
    ) -> Result<Vec<StaleArtifact>, RepoError> {
        let rows: Vec<(String, String, OffsetDateTime)> = sqlx::query_as(
            "SELECT job_id, artifact_path, finished_at FROM jobs \
             WHERE status = 'succeeded' AND artifact_path IS NOT NULL \
             AND finished_at IS NOT NULL",
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let mut stale = Vec::new();
        for (job_id, artifact_path, finished_at) in rows {
            if finished_at >= cutoff {
                continue;
            }
            let job_id = Uuid::parse_str(&job_id)
                .map_err(|_| RepoError::from_persistence(format!("malformed job id `{job_id}`")))?;
            stale.push(StaleArtifact {
                job_id,
                artifact_path,
            });
        }

        Ok(stale)
    }

    async fn forget_artifact(&self, job_id: Uuid) -> Result<(), RepoError> {
        sqlx::query("UPDATE jobs SET artifact_path = NULL WHERE job_id = ?")
            .bind(job_id.to_string())
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn mark_deduplicated(&self, job_id: Uuid) -> Result<(), RepoError> {
        sqlx::query("UPDATE jobs SET deduplicated = 1 WHERE job_id = ?")
            .bind(job_id.to_string())
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn recover_startup(&self) -> Result<RecoveryReport, RepoError> {
        let mut tx = self.pool().begin().await.map_err(map_sqlx_error)?;

        let requeued = sqlx::query(
            "UPDATE jobs SET status = 'queued', started_at = NULL WHERE status = 'running'",
        )
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        // With no job left running, every surviving lock is dangling.
        let released = sqlx::query("DELETE FROM domain_locks")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(RecoveryReport {
            requeued_jobs: requeued,
            released_locks: released,
        })
    }

    async fn upsert_heartbeat(&self, beat: &WorkerHeartbeatRecord) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO worker_heartbeats (worker_id, last_heartbeat, state, current_job_id) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT (worker_id) DO UPDATE SET last_heartbeat = excluded.last_heartbeat, \
             state = excluded.state, current_job_id = excluded.current_job_id",
        )
        .bind(&beat.worker_id)
        .bind(beat.last_heartbeat)
        .bind(&beat.state)
        .bind(beat.current_job_id.map(|id| id.to_string()))
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_heartbeat(
        &self,
        worker_id: &str,
    ) -> Result<Option<WorkerHeartbeatRecord>, RepoError> {
        let row: Option<(String, OffsetDateTime, String, Option<String>)> = sqlx::query_as(
            "SELECT worker_id, last_heartbeat, state, current_job_id \
             FROM worker_heartbeats WHERE worker_id = ?",
        )
        .bind(worker_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let Some((worker_id, last_heartbeat, state, current_job_id)) = row else {
            return Ok(None);
        };

        let current_job_id = current_job_id
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()
            .map_err(|_| RepoError::from_persistence("malformed heartbeat job id"))?;

        Ok(Some(WorkerHeartbeatRecord {
            worker_id,
            last_heartbeat,
            state,
            current_job_id,
        }))
    }
}
