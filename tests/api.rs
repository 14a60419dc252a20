//! Handler-level API tests against a real store and artifact directory.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use bytes::Bytes;
use tempfile::TempDir;
use time::OffsetDateTime;
use uuid::Uuid;

use stampa::application::queue::QueueService;
use stampa::application::repos::{JobOutcome, JobStore};
use stampa::domain::entities::WorkerHeartbeatRecord;
use stampa::domain::types::{JobDefaults, RenderMode};
use stampa::infra::artifacts::ArtifactStorage;
use stampa::infra::db::SqliteStore;
use stampa::infra::http::ApiState;
use stampa::infra::http::handlers;
use stampa::infra::http::models::SubmitJobRequest;
use stampa::worker::WORKER_ID;

struct TestApi {
    state: ApiState,
    store: SqliteStore,
    _db_dir: TempDir,
    _pdf_dir: TempDir,
}

async fn test_api() -> TestApi {
    let db_dir = TempDir::new().expect("db dir");
    let pdf_dir = TempDir::new().expect("pdf dir");

    let pool = SqliteStore::connect(&db_dir.path().join("api.db"), 4)
        .await
        .expect("connect");
    SqliteStore::run_migrations(&pool).await.expect("migrate");
    let store = SqliteStore::new(pool);

    let defaults = JobDefaults {
        render_mode: RenderMode::PrintToPdf,
        navigation_timeout_seconds: 45,
        job_timeout_seconds: 120,
        max_domain_wait_seconds: 600,
        max_retries: 2,
    };
    let queue = QueueService::new(Arc::new(store.clone()) as Arc<dyn JobStore>, defaults);
    let artifacts = Arc::new(ArtifactStorage::new(pdf_dir.path().to_path_buf()).expect("storage"));

    TestApi {
        state: ApiState {
            queue,
            db: store.clone(),
            artifacts,
        },
        store,
        _db_dir: db_dir,
        _pdf_dir: pdf_dir,
    }
}

fn submit_body(url: &str) -> SubmitJobRequest {
    SubmitJobRequest {
        url: url.to_string(),
        render_mode: None,
        navigation_timeout_seconds: None,
        job_timeout_seconds: None,
        max_domain_wait_seconds: None,
        max_retries: None,
        metadata: None,
    }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn submit_accepts_a_job_with_202() {
    let api = test_api().await;

    let response = handlers::submit_job(
        State(api.state.clone()),
        Json(submit_body("https://example.com/a")),
    )
    .await
    .expect("submit ok")
    .into_response();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "queued");
    assert_eq!(body["deduplicated"], false);
    assert!(body["job_id"].as_str().is_some());
}

#[tokio::test]
async fn second_submit_reports_deduplicated() {
    let api = test_api().await;

    let first = handlers::submit_job(
        State(api.state.clone()),
        Json(submit_body("https://EXAMPLE.com:443/a#frag")),
    )
    .await
    .expect("first submit")
    .into_response();
    let first = body_json(first).await;

    let second = handlers::submit_job(
        State(api.state.clone()),
        Json(submit_body("https://example.com/a")),
    )
    .await
    .expect("second submit")
    .into_response();
    let second = body_json(second).await;

    assert_eq!(first["job_id"], second["job_id"]);
    assert_eq!(second["deduplicated"], true);
}

#[tokio::test]
async fn metadata_bound_submission_is_blocked_without_a_job_row() {
    let api = test_api().await;

    let response = handlers::submit_job(
        State(api.state.clone()),
        Json(submit_body("http://169.254.169.254/latest/meta-data")),
    )
    .await
    .err()
    .expect("submission must be rejected")
    .into_response();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "SSRF_BLOCKED");

    let job_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
        .fetch_one(api.store.pool())
        .await
        .expect("count jobs");
    assert_eq!(job_rows, 0);
}

#[tokio::test]
async fn malformed_url_maps_to_invalid_url() {
    let api = test_api().await;

    let response = handlers::submit_job(
        State(api.state.clone()),
        Json(submit_body("ftp://example.com/file")),
    )
    .await
    .err()
    .expect("submission must be rejected")
    .into_response();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "INVALID_URL");
}

#[tokio::test]
async fn unknown_job_is_404() {
    let api = test_api().await;

    let response = handlers::get_job(State(api.state.clone()), Path(Uuid::new_v4().to_string()))
        .await
        .err()
        .expect("missing job")
        .into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // A non-UUID path segment is indistinguishable from a missing job.
    let response = handlers::get_job(State(api.state.clone()), Path("not-a-uuid".to_string()))
        .await
        .err()
        .expect("missing job")
        .into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn job_view_exposes_lifecycle_fields() {
    let api = test_api().await;

    let submitted = handlers::submit_job(
        State(api.state.clone()),
        Json(submit_body("https://example.com/view")),
    )
    .await
    .expect("submit")
    .into_response();
    let submitted = body_json(submitted).await;
    let job_id = submitted["job_id"].as_str().expect("job id").to_string();

    let response = handlers::get_job(State(api.state.clone()), Path(job_id.clone()))
        .await
        .expect("get job")
        .into_response();
    assert_eq!(response.status(), StatusCode::OK);

    let view = body_json(response).await;
    assert_eq!(view["job_id"], job_id.as_str());
    assert_eq!(view["status"], "queued");
    assert_eq!(view["attempts"], 0);
    assert!(view["created_at"].as_str().is_some());
    assert!(view["started_at"].is_null());
    assert!(view["error_code"].is_null());
}

#[tokio::test]
async fn download_of_unfinished_job_is_400() {
    let api = test_api().await;

    let submitted = handlers::submit_job(
        State(api.state.clone()),
        Json(submit_body("https://example.com/pending")),
    )
    .await
    .expect("submit")
    .into_response();
    let submitted = body_json(submitted).await;
    let job_id = submitted["job_id"].as_str().expect("job id").to_string();

    let response = handlers::download_pdf(State(api.state.clone()), Path(job_id))
        .await
        .expect_err("not ready")
        .into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    let message = body["error"]["message"].as_str().expect("message");
    assert!(message.contains("queued"), "message was: {message}");
}

#[tokio::test]
async fn download_streams_the_stored_pdf() {
    let api = test_api().await;

    let outcome = api
        .state
        .queue
        .submit(stampa::application::queue::SubmitCommand {
            url: "https://example.com/done".to_string(),
            ..Default::default()
        })
        .await
        .expect("submit");
    api.state
        .queue
        .claim_cycle(OffsetDateTime::now_utc())
        .await
        .expect("claim");

    let stored = api
        .state
        .artifacts
        .write(outcome.job.id, &Bytes::from_static(b"%PDF-1.7 rendered"))
        .await
        .expect("write artifact");
    api.state
        .queue
        .complete(
            outcome.job.id,
            JobOutcome::Succeeded {
                artifact_path: stored,
            },
        )
        .await
        .expect("complete");

    let response =
        handlers::download_pdf(State(api.state.clone()), Path(outcome.job.id.to_string()))
            .await
            .expect("download")
            .into_response();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok()),
        Some("application/pdf")
    );

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert!(bytes.starts_with(b"%PDF"));
}

#[tokio::test]
async fn cleaned_up_artifact_downloads_as_404() {
    let api = test_api().await;

    let outcome = api
        .state
        .queue
        .submit(stampa::application::queue::SubmitCommand {
            url: "https://example.com/cleaned".to_string(),
            ..Default::default()
        })
        .await
        .expect("submit");
    api.state
        .queue
        .claim_cycle(OffsetDateTime::now_utc())
        .await
        .expect("claim");

    // Finished with an artifact path whose file no longer exists.
    api.state
        .queue
        .complete(
            outcome.job.id,
            JobOutcome::Succeeded {
                artifact_path: format!("{}.pdf", outcome.job.id),
            },
        )
        .await
        .expect("complete");

    let response =
        handlers::download_pdf(State(api.state.clone()), Path(outcome.job.id.to_string()))
            .await
            .expect_err("artifact gone")
            .into_response();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(
        body["error"]["message"],
        "PDF file not found (may have been cleaned up)"
    );
}

#[tokio::test]
async fn healthz_reports_worker_liveness() {
    let api = test_api().await;

    // No heartbeat row yet: degraded with a missing worker.
    let response = handlers::healthz(State(api.state.clone())).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["worker"]["status"], "missing");

    api.store
        .upsert_heartbeat(&WorkerHeartbeatRecord {
            worker_id: WORKER_ID.to_string(),
            last_heartbeat: OffsetDateTime::now_utc(),
            state: "idle".to_string(),
            current_job_id: None,
        })
        .await
        .expect("heartbeat");

    let response = handlers::healthz(State(api.state.clone())).await;
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["worker"]["status"], "healthy");
    assert_eq!(body["database"], "connected");
}
