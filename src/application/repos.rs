//! Store contract: the transactional persistence boundary for jobs,
//! domain locks, and artifact bookkeeping.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::{DomainLockRecord, JobRecord, WorkerHeartbeatRecord};
use crate::domain::types::{FailureCode, RenderMode};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Fields required to persist a freshly submitted job.
#[derive(Debug, Clone)]
pub struct NewJobParams {
    pub id: Uuid,
    pub url: String,
    pub normalized_url: String,
    pub domain_key: String,
    pub render_mode: RenderMode,
    pub max_retries: i32,
    pub navigation_timeout_seconds: i64,
    pub job_timeout_seconds: i64,
    pub max_domain_wait_seconds: i64,
    pub metadata: Option<serde_json::Value>,
    pub created_at: OffsetDateTime,
    pub submission_date: String,
}

/// Terminal result applied by [`JobStore::finish_job`].
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Succeeded { artifact_path: String },
    Failed { code: FailureCode, message: String },
}

/// A succeeded job whose artifact has aged past the cleanup threshold.
#[derive(Debug, Clone)]
pub struct StaleArtifact {
    pub job_id: Uuid,
    pub artifact_path: String,
}

/// Counts reported by the startup recovery pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryReport {
    pub requeued_jobs: u64,
    pub released_locks: u64,
}

/// Durable job storage with transactional claim/finish primitives.
///
/// `claim_next` and `finish_job` are serializable with respect to each
/// other: a claim never observes a half-released lock, and no two claims
/// can take the same lock.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Look up an existing job for the `(normalized_url, submission_date)`
    /// dedup pair.
    async fn find_dedup(
        &self,
        normalized_url: &str,
        submission_date: &str,
    ) -> Result<Option<JobRecord>, RepoError>;

    /// Insert a new queued job. Fails with [`RepoError::Duplicate`] when the
    /// dedup pair already exists.
    async fn insert_job(&self, params: NewJobParams) -> Result<JobRecord, RepoError>;

    /// Atomically claim the oldest ready job whose domain lock is free,
    /// acquiring the lock and marking it running. Ready `queued` jobs whose
    /// domain is locked are downgraded to `waiting_domain_lock` in the same
    /// transaction.
    async fn claim_next(&self, now: OffsetDateTime) -> Result<Option<JobRecord>, RepoError>;

    /// Fail every `waiting_domain_lock` job that has waited longer than its
    /// `max_domain_wait_seconds`. Returns the number of jobs failed.
    async fn sweep_expired_waiting(&self, now: OffsetDateTime) -> Result<u64, RepoError>;

    /// Increment the attempt counter, returning the new value.
    async fn bump_attempt(&self, job_id: Uuid) -> Result<i32, RepoError>;

    /// Apply a terminal outcome and release the domain lock atomically.
    async fn finish_job(
        &self,
        job_id: Uuid,
        outcome: JobOutcome,
        finished_at: OffsetDateTime,
    ) -> Result<(), RepoError>;

    /// Return a job to `queued` for retry, clearing `started_at` and
    /// releasing the domain lock so other domains can progress.
    async fn requeue_job(&self, job_id: Uuid) -> Result<(), RepoError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<JobRecord>, RepoError>;

    /// Current lock holder for a domain, if any.
    async fn get_domain_lock(
        &self,
        domain_key: &str,
    ) -> Result<Option<DomainLockRecord>, RepoError>;

    /// Succeeded jobs finished before `cutoff` that still reference an
    /// artifact path.
    async fn list_stale_artifacts(
        &self,
        cutoff: OffsetDateTime,
    ) -> Result<Vec<StaleArtifact>, RepoError>;

    /// Clear the artifact path after the file has been deleted.
    async fn forget_artifact(&self, job_id: Uuid) -> Result<(), RepoError>;

    /// Record that a duplicate submission was absorbed by this job.
    async fn mark_deduplicated(&self, job_id: Uuid) -> Result<(), RepoError>;

    /// Startup pass for the single worker: requeue jobs left `running` by a
    /// crashed predecessor and drop locks whose holder is not running.
    async fn recover_startup(&self) -> Result<RecoveryReport, RepoError>;

    async fn upsert_heartbeat(&self, beat: &WorkerHeartbeatRecord) -> Result<(), RepoError>;

    async fn get_heartbeat(
        &self,
        worker_id: &str,
    ) -> Result<Option<WorkerHeartbeatRecord>, RepoError>;
}
