//! End-to-end worker tests driving the render loop against a scripted
//! browser binary.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::sleep;

use stampa::application::queue::{QueueService, SubmitCommand};
use stampa::application::repos::JobStore;
use stampa::domain::entities::JobRecord;
use stampa::domain::types::{JobDefaults, JobStatus, RenderMode};
use stampa::infra::artifacts::ArtifactStorage;
use stampa::infra::db::SqliteStore;
use stampa::infra::render::ChromiumRenderer;
use stampa::worker::Worker;

struct Harness {
    queue: QueueService,
    artifacts: Arc<ArtifactStorage>,
    _dirs: Vec<TempDir>,
}

fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-chromium");
    std::fs::write(&path, format!("#!/bin/sh\nset -eu\n{body}")).expect("write script");
    let mut perms = std::fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("set perms");
    path
}

async fn harness(script_body: &str) -> Harness {
    let db_dir = TempDir::new().expect("db dir");
    let pdf_dir = TempDir::new().expect("pdf dir");
    let bin_dir = TempDir::new().expect("bin dir");

    let pool = SqliteStore::connect(&db_dir.path().join("worker.db"), 4)
        .await
        .expect("connect");
    SqliteStore::run_migrations(&pool).await.expect("migrate");
    let store = SqliteStore::new(pool);

    let queue = QueueService::new(
        Arc::new(store.clone()) as Arc<dyn JobStore>,
        JobDefaults {
            render_mode: RenderMode::PrintToPdf,
            navigation_timeout_seconds: 5,
            job_timeout_seconds: 30,
            max_domain_wait_seconds: 600,
            max_retries: 2,
        },
    );
    let artifacts = Arc::new(ArtifactStorage::new(pdf_dir.path().to_path_buf()).expect("storage"));

    let binary = write_script(bin_dir.path(), script_body);
    let renderer = Arc::new(ChromiumRenderer::new(binary));

    let worker = Worker::new(
        queue.clone(),
        renderer,
        artifacts.clone(),
        Duration::from_millis(50),
    )
    .expect("worker");
    tokio::spawn(async move {
        let _ = worker.run().await;
    });

    Harness {
        queue,
        artifacts,
        _dirs: vec![db_dir, pdf_dir, bin_dir],
    }
}

async fn wait_terminal(queue: &QueueService, job_id: uuid::Uuid) -> JobRecord {
    for _ in 0..200 {
        let job = queue
            .get_job(job_id)
            .await
            .expect("get")
            .expect("job exists");
        if job.status.is_terminal() {
            return job;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("job {job_id} did not reach a terminal state in time");
}

const RENDER_OK: &str = r#"
for arg in "$@"; do
  case "$arg" in
    --print-to-pdf=*)
      printf '%%PDF-1.7 worker' > "${arg#--print-to-pdf=}"
      ;;
  esac
done
"#;

#[tokio::test]
async fn worker_renders_a_submitted_job_end_to_end() {
    let harness = harness(RENDER_OK).await;

    // The .invalid TLD never resolves, so the redirect probe falls through
    // to the scripted browser.
    let outcome = harness
        .queue
        .submit(SubmitCommand {
            url: "https://render-me.invalid/page".to_string(),
            ..SubmitCommand::default()
        })
        .await
        .expect("submit");

    let job = wait_terminal(&harness.queue, outcome.job.id).await;
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.attempts, 1);
    assert!(job.error_code.is_none());

    let stored = job.artifact_path.expect("artifact path");
    let bytes = harness.artifacts.read(&stored).await.expect("artifact");
    assert!(bytes.starts_with(b"%PDF"));
}

#[tokio::test]
async fn worker_retries_a_transient_failure_then_succeeds() {
    let marker_dir = TempDir::new().expect("marker dir");
    let marker = marker_dir.path().join("first-attempt-done");
    let script = format!(
        r#"
if [ ! -f "{marker}" ]; then
  : > "{marker}"
  echo "net::ERR_CONNECTION_RESET" >&2
  exit 1
fi
for arg in "$@"; do
  case "$arg" in
    --print-to-pdf=*)
      printf '%%PDF-1.7 retried' > "${{arg#--print-to-pdf=}}"
      ;;
  esac
done
"#,
        marker = marker.display()
    );

    let harness = harness(&script).await;
    let outcome = harness
        .queue
        .submit(SubmitCommand {
            url: "https://retry-me.invalid/page".to_string(),
            ..SubmitCommand::default()
        })
        .await
        .expect("submit");

    let job = wait_terminal(&harness.queue, outcome.job.id).await;
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.attempts, 2);
    assert!(job.attempts <= job.max_retries + 1);
}

#[tokio::test]
async fn worker_exhausts_retries_into_render_failed() {
    let harness = harness("echo 'net::ERR_NAME_NOT_RESOLVED' >&2\nexit 1\n").await;

    let outcome = harness
        .queue
        .submit(SubmitCommand {
            url: "https://always-down.invalid/".to_string(),
            max_retries: Some(1),
            ..SubmitCommand::default()
        })
        .await
        .expect("submit");

    let job = wait_terminal(&harness.queue, outcome.job.id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.error_code,
        Some(stampa::domain::types::FailureCode::RenderFailed)
    );
    assert_eq!(job.attempts, 2);
    assert!(job.artifact_path.is_none());
}
