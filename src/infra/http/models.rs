//! Request and response bodies for the job API.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use crate::domain::entities::JobRecord;
use crate::domain::types::{JobStatus, RenderMode};

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub url: String,
    pub render_mode: Option<RenderMode>,
    pub navigation_timeout_seconds: Option<i64>,
    pub job_timeout_seconds: Option<i64>,
    pub max_domain_wait_seconds: Option<i64>,
    pub max_retries: Option<i32>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub deduplicated: bool,
}

#[derive(Debug, Serialize)]
pub struct JobView {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub attempts: i32,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub deduplicated: bool,
}

impl From<&JobRecord> for JobView {
    fn from(job: &JobRecord) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            attempts: job.attempts,
            created_at: iso8601(job.created_at),
            started_at: job.started_at.map(iso8601),
            finished_at: job.finished_at.map(iso8601),
            error_code: job.error_code.map(|code| code.as_str().to_string()),
            error_message: job.error_message.clone(),
            deduplicated: job.deduplicated,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub worker: WorkerHealth,
}

#[derive(Debug, Serialize)]
pub struct WorkerHealth {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_job: Option<Uuid>,
}

fn iso8601(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}
