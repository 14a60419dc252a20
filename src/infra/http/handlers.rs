//! HTTP handlers: thin request/response glue over the queue service.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use crate::application::queue::{SubmitCommand, SubmitError};
use crate::domain::entities::{HEARTBEAT_STALE_AFTER, WORKER_ID};
use crate::domain::types::JobStatus;
use crate::domain::url::UrlValidationError;
use crate::infra::artifacts::ArtifactStorageError;

use super::error::{ApiError, codes};
use super::models::{HealthResponse, JobView, SubmitJobRequest, SubmitJobResponse, WorkerHealth};
use super::state::ApiState;

const ARTIFACT_GONE: &str = "PDF file not found (may have been cleaned up)";

pub async fn submit_job(
    State(state): State<ApiState>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .queue
        .submit(SubmitCommand {
            url: request.url,
            render_mode: request.render_mode,
            navigation_timeout_seconds: request.navigation_timeout_seconds,
            job_timeout_seconds: request.job_timeout_seconds,
            max_domain_wait_seconds: request.max_domain_wait_seconds,
            max_retries: request.max_retries,
            metadata: request.metadata,
        })
        .await
        .map_err(|err| match err {
            SubmitError::Validation(UrlValidationError::Invalid(reason)) => {
                ApiError::bad_request(codes::INVALID_URL, reason)
            }
            SubmitError::Validation(UrlValidationError::SsrfBlocked(reason)) => {
                ApiError::bad_request(codes::SSRF_BLOCKED, reason)
            }
            SubmitError::Repo(err) => ApiError::internal(err.to_string()),
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id: outcome.job.id,
            status: outcome.job.status,
            deduplicated: outcome.deduplicated,
        }),
    ))
}

pub async fn get_job(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = lookup_job(&state, &job_id).await?;
    Ok(Json(JobView::from(&job)))
}

pub async fn download_pdf(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let job = lookup_job(&state, &job_id).await?;

    if job.status != JobStatus::Succeeded {
        return Err(ApiError::bad_request(
            codes::JOB_NOT_READY,
            format!("Job not completed. Current status: {}", job.status.as_str()),
        ));
    }

    let Some(stored_path) = job.artifact_path.as_deref() else {
        return Err(ApiError::not_found(ARTIFACT_GONE));
    };

    let data = state
        .artifacts
        .read(stored_path)
        .await
        .map_err(|err| match err {
            ArtifactStorageError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                ApiError::not_found(ARTIFACT_GONE)
            }
            other => ApiError::internal(other.to_string()),
        })?;

    let response = (
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.pdf\"", job.id),
            ),
        ],
        data,
    )
        .into_response();

    Ok(response)
}

pub async fn healthz(State(state): State<ApiState>) -> Response {
    if let Err(err) = state.db.health_check().await {
        let body = serde_json::json!({
            "status": "unhealthy",
            "error": err.to_string(),
        });
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    }

    let heartbeat = state
        .queue
        .store()
        .get_heartbeat(WORKER_ID)
        .await
        .ok()
        .flatten();

    let worker = match heartbeat {
        Some(beat) => {
            let age = OffsetDateTime::now_utc() - beat.last_heartbeat;
            let alive = age < HEARTBEAT_STALE_AFTER;
            WorkerHealth {
                status: if alive { "healthy" } else { "stale" },
                last_heartbeat: beat.last_heartbeat.format(&Rfc3339).ok(),
                age_seconds: Some((age.as_seconds_f64() * 10.0).round() / 10.0),
                state: Some(beat.state),
                current_job: beat.current_job_id,
            }
        }
        None => WorkerHealth {
            status: "missing",
            last_heartbeat: None,
            age_seconds: None,
            state: None,
            current_job: None,
        },
    };

    let body = HealthResponse {
        status: if worker.status == "healthy" {
            "healthy"
        } else {
            "degraded"
        },
        database: "connected",
        worker,
    };

    Json(body).into_response()
}

async fn lookup_job(
    state: &ApiState,
    job_id: &str,
) -> Result<crate::domain::entities::JobRecord, ApiError> {
    let id = Uuid::parse_str(job_id).map_err(|_| ApiError::not_found("Job not found"))?;

    state
        .queue
        .get_job(id)
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?
        .ok_or_else(|| ApiError::not_found("Job not found"))
}
