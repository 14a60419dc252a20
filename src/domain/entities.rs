//! Domain entities mirrored from persistent storage.

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::types::{FailureCode, JobStatus, RenderMode};

/// A single webpage-to-PDF conversion job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub id: Uuid,
    /// Submitted URL, stored verbatim for audit.
    pub url: String,
    /// Canonical form used for same-day deduplication.
    pub normalized_url: String,
    /// Registrable domain (eTLD+1) the job serializes on.
    pub domain_key: String,
    pub render_mode: RenderMode,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_retries: i32,
    pub navigation_timeout_seconds: i64,
    pub job_timeout_seconds: i64,
    pub max_domain_wait_seconds: i64,
    pub metadata: Option<serde_json::Value>,
    pub error_code: Option<FailureCode>,
    pub error_message: Option<String>,
    pub created_at: OffsetDateTime,
    pub started_at: Option<OffsetDateTime>,
    pub finished_at: Option<OffsetDateTime>,
    pub artifact_path: Option<String>,
    /// Whether this row was ever returned for a duplicate submission.
    pub deduplicated: bool,
    /// UTC calendar day of submission, `YYYY-MM-DD`.
    pub submission_date: String,
}

/// Mutual-exclusion record: at most one running job per registrable domain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainLockRecord {
    pub domain_key: String,
    pub held_by_job_id: Uuid,
    pub acquired_at: OffsetDateTime,
}

/// There is exactly one worker process; it registers under a fixed id.
pub const WORKER_ID: &str = "worker-1";

/// A heartbeat older than this marks the worker as stale in `/healthz`.
pub const HEARTBEAT_STALE_AFTER: time::Duration = time::Duration::seconds(30);

/// Liveness record maintained by the single worker process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerHeartbeatRecord {
    pub worker_id: String,
    pub last_heartbeat: OffsetDateTime,
    pub state: String,
    pub current_job_id: Option<Uuid>,
}
