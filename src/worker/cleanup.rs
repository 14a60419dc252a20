//! Cleanup sweep: artifacts are ephemeral and disappear once they age past
//! the configured threshold. Job rows persist and report the file as gone.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::application::repos::{JobStore, RepoError};
use crate::infra::artifacts::ArtifactStorage;

#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupStats {
    pub deleted: u64,
    pub errors: u64,
}

pub struct CleanupSweeper {
    store: Arc<dyn JobStore>,
    artifacts: Arc<ArtifactStorage>,
    interval: Duration,
    file_age: Duration,
}

impl CleanupSweeper {
    pub fn new(
        store: Arc<dyn JobStore>,
        artifacts: Arc<ArtifactStorage>,
        interval: Duration,
        file_age: Duration,
    ) -> Self {
        Self {
            store,
            artifacts,
            interval,
            file_age,
        }
    }

    /// Run the sweep loop until the task is cancelled.
    pub async fn run(&self) {
        info!(
            target = "stampa::cleanup",
            interval_s = self.interval.as_secs(),
            file_age_s = self.file_age.as_secs(),
            "cleanup sweeper started"
        );

        loop {
            match self.sweep_once(OffsetDateTime::now_utc()).await {
                Ok(stats) if stats.deleted > 0 || stats.errors > 0 => {
                    info!(
                        target = "stampa::cleanup",
                        deleted = stats.deleted,
                        errors = stats.errors,
                        "cleanup sweep completed"
                    );
                }
                Ok(_) => {}
                Err(err) => {
                    error!(target = "stampa::cleanup", error = %err, "cleanup sweep failed");
                }
            }

            sleep(self.interval).await;
        }
    }

    /// Delete artifacts of succeeded jobs finished before `now - file_age`,
    /// then clear their paths. Missing files count as deleted.
    pub async fn sweep_once(&self, now: OffsetDateTime) -> Result<CleanupStats, RepoError> {
        let cutoff = now - time::Duration::seconds(self.file_age.as_secs() as i64);
        let stale = self.store.list_stale_artifacts(cutoff).await?;

        let mut stats = CleanupStats::default();
        for artifact in stale {
            if let Err(err) = self.artifacts.delete(&artifact.artifact_path).await {
                stats.errors += 1;
                warn!(
                    target = "stampa::cleanup",
                    job_id = %artifact.job_id,
                    path = %artifact.artifact_path,
                    error = %err,
                    "failed to delete stale artifact"
                );
                continue;
            }

            self.store.forget_artifact(artifact.job_id).await?;
            stats.deleted += 1;
        }

        Ok(stats)
    }
}
