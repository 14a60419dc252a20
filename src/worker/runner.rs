//! Single worker loop: claims one job at a time, renders it, and settles
//! the outcome. Exactly one render is in flight at any moment.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use time::OffsetDateTime;
use tokio::time::sleep;
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::queue::QueueService;
use crate::application::renderer::{RenderError, RenderRequest, Renderer};
use crate::application::repos::JobOutcome;
use crate::domain::entities::{JobRecord, WORKER_ID, WorkerHeartbeatRecord};
use crate::domain::types::FailureCode;
use crate::domain::url::{self as domain_url, UrlValidationError};
use crate::infra::artifacts::ArtifactStorage;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
const REDIRECT_HOP_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_REDIRECT_HOPS: usize = 5;
/// Pause after an unexpected loop error so a broken store cannot spin hot.
const FAULT_BACKOFF: Duration = Duration::from_secs(5);

enum ProcessResult {
    Success(String),
    Transient(String),
    Permanent(FailureCode, String),
}

pub struct Worker {
    queue: QueueService,
    renderer: Arc<dyn Renderer>,
    artifacts: Arc<ArtifactStorage>,
    poll_interval: Duration,
    http: reqwest::Client,
    current_job: Arc<Mutex<Option<Uuid>>>,
}

impl Worker {
    pub fn new(
        queue: QueueService,
        renderer: Arc<dyn Renderer>,
        artifacts: Arc<ArtifactStorage>,
        poll_interval: Duration,
    ) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(REDIRECT_HOP_TIMEOUT)
            .build()
            .map_err(|err| AppError::unexpected(format!("failed to build http client: {err}")))?;

        Ok(Self {
            queue,
            renderer,
            artifacts,
            poll_interval,
            http,
            current_job: Arc::new(Mutex::new(None)),
        })
    }

    /// Run the render loop until the task is cancelled.
    pub async fn run(&self) -> Result<(), AppError> {
        let report = self.queue.store().recover_startup().await?;
        if report.requeued_jobs > 0 || report.released_locks > 0 {
            warn!(
                target = "stampa::worker",
                requeued = report.requeued_jobs,
                released_locks = report.released_locks,
                "recovered state left behind by a previous worker"
            );
        }

        let _heartbeat = self.spawn_heartbeat();
        info!(target = "stampa::worker", "worker started");

        loop {
            match self.queue.claim_cycle(OffsetDateTime::now_utc()).await {
                Ok(Some(job)) => {
                    self.set_current(Some(job.id));
                    let result = self.process_job(&job).await;
                    self.set_current(None);

                    if let Err(err) = self.settle(&job, result).await {
                        // The job stays running; the next startup recovery
                        // pass requeues it.
                        error!(
                            target = "stampa::worker",
                            job_id = %job.id,
                            error = %err,
                            "failed to persist job outcome"
                        );
                        sleep(FAULT_BACKOFF).await;
                    }
                }
                Ok(None) => sleep(self.poll_interval).await,
                Err(err) => {
                    error!(target = "stampa::worker", error = %err, "claim poll failed");
                    sleep(FAULT_BACKOFF).await;
                }
            }
        }
    }

    async fn process_job(&self, job: &JobRecord) -> ProcessResult {
        info!(
            target = "stampa::worker",
            job_id = %job.id,
            url = %job.normalized_url,
            render_mode = job.render_mode.as_str(),
            attempt = job.attempts,
            max_retries = job.max_retries,
            "processing job"
        );

        // Revalidate: the stored URL may have been accepted by an older
        // ruleset than the one now in force.
        let safe = match domain_url::validate(&job.normalized_url) {
            Ok(safe) => safe,
            Err(UrlValidationError::Invalid(reason)) => {
                return ProcessResult::Permanent(FailureCode::InvalidUrl, reason);
            }
            Err(UrlValidationError::SsrfBlocked(reason)) => {
                return ProcessResult::Permanent(FailureCode::SsrfBlocked, reason);
            }
        };

        let final_url = match self.resolve_redirects(&safe.normalized).await {
            Ok(final_url) => final_url,
            Err(UrlValidationError::Invalid(reason)) => {
                return ProcessResult::Permanent(
                    FailureCode::InvalidUrl,
                    format!("redirect target rejected: {reason}"),
                );
            }
            Err(UrlValidationError::SsrfBlocked(reason)) => {
                return ProcessResult::Permanent(
                    FailureCode::SsrfBlocked,
                    format!("redirect target rejected: {reason}"),
                );
            }
        };

        let deadline = job_deadline(job);
        let request = RenderRequest {
            url: final_url,
            mode: job.render_mode,
            navigation_timeout: Duration::from_secs(job.navigation_timeout_seconds as u64),
        };

        let rendered = match tokio::time::timeout(deadline, self.renderer.render(request)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(RenderError::Transient(reason))) => return ProcessResult::Transient(reason),
            Ok(Err(RenderError::Permanent(reason))) => {
                return ProcessResult::Permanent(FailureCode::RenderFailed, reason);
            }
            Err(_) => {
                return ProcessResult::Transient(format!(
                    "job timeout: exceeded time limit of {}s",
                    job.job_timeout_seconds
                ));
            }
        };

        match self.artifacts.write(job.id, &rendered).await {
            Ok(stored_path) => ProcessResult::Success(stored_path),
            Err(err) => ProcessResult::Transient(format!("failed to store artifact: {err}")),
        }
    }

    async fn settle(&self, job: &JobRecord, result: ProcessResult) -> Result<(), AppError> {
        match result {
            ProcessResult::Success(artifact_path) => {
                self.queue
                    .complete(job.id, JobOutcome::Succeeded { artifact_path })
                    .await?;
            }
            ProcessResult::Permanent(code, message) => {
                warn!(
                    target = "stampa::worker",
                    job_id = %job.id,
                    error_code = code.as_str(),
                    message = %message,
                    "job failed permanently"
                );
                self.queue
                    .complete(job.id, JobOutcome::Failed { code, message })
                    .await?;
            }
            ProcessResult::Transient(message) => {
                if job.attempts <= job.max_retries {
                    info!(
                        target = "stampa::worker",
                        job_id = %job.id,
                        attempt = job.attempts,
                        max_retries = job.max_retries,
                        message = %message,
                        "transient failure, requeueing"
                    );
                    self.queue.requeue(job.id).await?;
                } else {
                    warn!(
                        target = "stampa::worker",
                        job_id = %job.id,
                        attempts = job.attempts,
                        message = %message,
                        "retries exhausted"
                    );
                    self.queue
                        .complete(
                            job.id,
                            JobOutcome::Failed {
                                code: FailureCode::RenderFailed,
                                message,
                            },
                        )
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Walk the redirect chain with HEAD requests, re-validating every hop.
    /// Network errors abort the walk; the renderer will surface them.
    async fn resolve_redirects(&self, start: &str) -> Result<String, UrlValidationError> {
        let mut current = start.to_string();

        for _ in 0..MAX_REDIRECT_HOPS {
            let response = match self.http.head(current.as_str()).send().await {
                Ok(response) => response,
                Err(_) => break,
            };

            if !is_redirect(response.status()) {
                break;
            }

            let Some(location) = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
            else {
                break;
            };

            let next = match absolutize(&current, location) {
                Some(next) => next,
                None => break,
            };

            let safe = domain_url::validate(&next)?;
            if safe.normalized == current {
                break;
            }
            current = safe.normalized;
        }

        Ok(current)
    }

    fn spawn_heartbeat(&self) -> tokio::task::JoinHandle<()> {
        let store = self.queue.store().clone();
        let current_job = self.current_job.clone();

        tokio::spawn(async move {
            loop {
                let current = current_job.lock().ok().and_then(|guard| *guard);
                let beat = WorkerHeartbeatRecord {
                    worker_id: WORKER_ID.to_string(),
                    last_heartbeat: OffsetDateTime::now_utc(),
                    state: if current.is_some() { "working" } else { "idle" }.to_string(),
                    current_job_id: current,
                };

                if let Err(err) = store.upsert_heartbeat(&beat).await {
                    warn!(target = "stampa::worker", error = %err, "heartbeat update failed");
                }

                sleep(HEARTBEAT_INTERVAL).await;
            }
        })
    }

    fn set_current(&self, job_id: Option<Uuid>) {
        if let Ok(mut guard) = self.current_job.lock() {
            *guard = job_id;
        }
    }
}

/// Remaining time before `job_timeout_seconds`, measured from `started_at`.
fn job_deadline(job: &JobRecord) -> Duration {
    let budget = Duration::from_secs(job.job_timeout_seconds as u64);
    let Some(started_at) = job.started_at else {
        return budget;
    };

    let elapsed = OffsetDateTime::now_utc() - started_at;
    let elapsed = Duration::from_secs_f64(elapsed.as_seconds_f64().max(0.0));
    budget.saturating_sub(elapsed)
}

fn is_redirect(status: StatusCode) -> bool {
    status == StatusCode::MOVED_PERMANENTLY
        || status == StatusCode::FOUND
        || status == StatusCode::SEE_OTHER
        || status == StatusCode::TEMPORARY_REDIRECT
        || status == StatusCode::PERMANENT_REDIRECT
}

/// Resolve a possibly-relative `Location` header against the current URL.
fn absolutize(current: &str, location: &str) -> Option<String> {
    let base = Url::parse(current).ok()?;
    base.join(location).ok().map(|joined| joined.to_string())
}
