//! Queue service: owns the job state machine and is the sole writer of
//! job state. Everything else observes through `get_job`.

use std::sync::Arc;

use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::FormatItem;
use time::macros::format_description;
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::repos::{JobOutcome, JobStore, NewJobParams, RepoError};
use crate::domain::entities::JobRecord;
use crate::domain::types::{
    JOB_TIMEOUT_RANGE, JobDefaults, MAX_DOMAIN_WAIT_RANGE, MAX_RETRIES_RANGE,
    NAVIGATION_TIMEOUT_RANGE, RenderMode,
};
use crate::domain::url::{self, UrlValidationError};

const SUBMISSION_DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

#[derive(Debug, Clone, Default)]
pub struct SubmitCommand {
    pub url: String,
    pub render_mode: Option<RenderMode>,
    pub navigation_timeout_seconds: Option<i64>,
    pub job_timeout_seconds: Option<i64>,
    pub max_domain_wait_seconds: Option<i64>,
    pub max_retries: Option<i32>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub job: JobRecord,
    pub deduplicated: bool,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] UrlValidationError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Clone)]
pub struct QueueService {
    store: Arc<dyn JobStore>,
    defaults: JobDefaults,
}

impl QueueService {
    pub fn new(store: Arc<dyn JobStore>, defaults: JobDefaults) -> Self {
        Self { store, defaults }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Submit a URL for conversion. Same-day resubmissions of the same
    /// normalized URL return the existing job, whatever its status.
    pub async fn submit(&self, command: SubmitCommand) -> Result<SubmitOutcome, SubmitError> {
        let safe = url::validate(&command.url)?;

        let now = OffsetDateTime::now_utc();
        let submission_date = submission_date(now);

        if let Some(existing) = self
            .store
            .find_dedup(&safe.normalized, &submission_date)
            .await?
        {
            debug!(
                target = "stampa::queue",
                job_id = %existing.id,
                url = %safe.normalized,
                "submit deduplicated against existing job"
            );
            return Ok(self.absorb_duplicate(existing).await?);
        }

        let params = NewJobParams {
            id: Uuid::new_v4(),
            url: command.url,
            normalized_url: safe.normalized.clone(),
            domain_key: safe.domain_key,
            render_mode: command.render_mode.unwrap_or(self.defaults.render_mode),
            max_retries: clamp_i32(
                command.max_retries.unwrap_or(self.defaults.max_retries),
                MAX_RETRIES_RANGE,
            ),
            navigation_timeout_seconds: clamp_i64(
                command
                    .navigation_timeout_seconds
                    .unwrap_or(self.defaults.navigation_timeout_seconds),
                NAVIGATION_TIMEOUT_RANGE,
            ),
            job_timeout_seconds: clamp_i64(
                command
                    .job_timeout_seconds
                    .unwrap_or(self.defaults.job_timeout_seconds),
                JOB_TIMEOUT_RANGE,
            ),
            max_domain_wait_seconds: clamp_i64(
                command
                    .max_domain_wait_seconds
                    .unwrap_or(self.defaults.max_domain_wait_seconds),
                MAX_DOMAIN_WAIT_RANGE,
            ),
            metadata: command.metadata,
            created_at: now,
            submission_date: submission_date.clone(),
        };

        match self.store.insert_job(params).await {
            Ok(job) => {
                info!(
                    target = "stampa::queue",
                    job_id = %job.id,
                    domain_key = %job.domain_key,
                    url = %job.normalized_url,
                    "job created"
                );
                Ok(SubmitOutcome {
                    job,
                    deduplicated: false,
                })
            }
            // Lost a submit race: another request inserted the same dedup
            // pair between our lookup and insert. Return the winner.
            Err(RepoError::Duplicate { .. }) => {
                let existing = self
                    .store
                    .find_dedup(&safe.normalized, &submission_date)
                    .await?
                    .ok_or(RepoError::NotFound)?;
                Ok(self.absorb_duplicate(existing).await?)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn absorb_duplicate(&self, mut job: JobRecord) -> Result<SubmitOutcome, RepoError> {
        if !job.deduplicated {
            self.store.mark_deduplicated(job.id).await?;
            job.deduplicated = true;
        }
        Ok(SubmitOutcome {
            job,
            deduplicated: true,
        })
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<JobRecord>, RepoError> {
        self.store.get_job(job_id).await
    }

    /// One worker poll: fail over-aged waiting jobs, then claim the oldest
    /// ready job whose domain is free and count the attempt.
    pub async fn claim_cycle(&self, now: OffsetDateTime) -> Result<Option<JobRecord>, RepoError> {
        let expired = self.store.sweep_expired_waiting(now).await?;
        if expired > 0 {
            info!(
                target = "stampa::queue",
                expired, "failed jobs that exceeded their domain wait bound"
            );
        }

        let Some(mut job) = self.store.claim_next(now).await? else {
            return Ok(None);
        };

        job.attempts = self.store.bump_attempt(job.id).await?;
        info!(
            target = "stampa::queue",
            job_id = %job.id,
            domain_key = %job.domain_key,
            attempt = job.attempts,
            max_retries = job.max_retries,
            "job claimed"
        );
        Ok(Some(job))
    }

    /// Terminal transition; releases the domain lock atomically.
    pub async fn complete(&self, job_id: Uuid, outcome: JobOutcome) -> Result<(), RepoError> {
        let result = match &outcome {
            JobOutcome::Succeeded { .. } => "succeeded",
            JobOutcome::Failed { .. } => "failed",
        };
        self.store
            .finish_job(job_id, outcome, OffsetDateTime::now_utc())
            .await?;
        info!(target = "stampa::queue", job_id = %job_id, result, "job finished");
        Ok(())
    }

    /// Return a job to the queue for a later attempt, releasing its lock so
    /// other domains can progress in the meantime.
    pub async fn requeue(&self, job_id: Uuid) -> Result<(), RepoError> {
        self.store.requeue_job(job_id).await?;
        info!(target = "stampa::queue", job_id = %job_id, "job requeued for retry");
        Ok(())
    }
}

/// UTC calendar day used as the second half of the dedup key.
pub fn submission_date(now: OffsetDateTime) -> String {
    now.format(SUBMISSION_DATE_FORMAT)
        .unwrap_or_else(|_| now.date().to_string())
}

fn clamp_i64(value: i64, (low, high): (i64, i64)) -> i64 {
    value.clamp(low, high)
}

fn clamp_i32(value: i32, (low, high): (i32, i32)) -> i32 {
    value.clamp(low, high)
}
