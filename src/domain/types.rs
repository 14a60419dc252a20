//! Shared domain enumerations aligned with persisted column values.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    WaitingDomainLock,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::WaitingDomainLock => "waiting_domain_lock",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl TryFrom<&str> for JobStatus {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "queued" => Ok(JobStatus::Queued),
            "waiting_domain_lock" => Ok(JobStatus::WaitingDomainLock),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    PrintToPdf,
    ScreenshotToPdf,
}

impl RenderMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RenderMode::PrintToPdf => "print_to_pdf",
            RenderMode::ScreenshotToPdf => "screenshot_to_pdf",
        }
    }
}

impl TryFrom<&str> for RenderMode {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "print_to_pdf" => Ok(RenderMode::PrintToPdf),
            "screenshot_to_pdf" => Ok(RenderMode::ScreenshotToPdf),
            _ => Err(()),
        }
    }
}

/// Terminal failure classification surfaced as `error_code` on failed jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    InvalidUrl,
    SsrfBlocked,
    DomainWaitTimeout,
    RenderFailed,
}

impl FailureCode {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureCode::InvalidUrl => "INVALID_URL",
            FailureCode::SsrfBlocked => "SSRF_BLOCKED",
            FailureCode::DomainWaitTimeout => "DOMAIN_WAIT_TIMEOUT",
            FailureCode::RenderFailed => "RENDER_FAILED",
        }
    }
}

impl TryFrom<&str> for FailureCode {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "INVALID_URL" => Ok(FailureCode::InvalidUrl),
            "SSRF_BLOCKED" => Ok(FailureCode::SsrfBlocked),
            "DOMAIN_WAIT_TIMEOUT" => Ok(FailureCode::DomainWaitTimeout),
            "RENDER_FAILED" => Ok(FailureCode::RenderFailed),
            _ => Err(()),
        }
    }
}

/// Caller-supplied per-job bounds are clamped to these ranges.
pub const NAVIGATION_TIMEOUT_RANGE: (i64, i64) = (5, 300);
pub const JOB_TIMEOUT_RANGE: (i64, i64) = (10, 600);
pub const MAX_DOMAIN_WAIT_RANGE: (i64, i64) = (10, 3600);
pub const MAX_RETRIES_RANGE: (i32, i32) = (0, 5);

/// Per-job defaults applied when a submission omits a bound.
#[derive(Debug, Clone)]
pub struct JobDefaults {
    pub render_mode: RenderMode,
    pub navigation_timeout_seconds: i64,
    pub job_timeout_seconds: i64,
    pub max_domain_wait_seconds: i64,
    pub max_retries: i32,
}
