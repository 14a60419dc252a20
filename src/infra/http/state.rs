use std::sync::Arc;

use crate::application::queue::QueueService;
use crate::infra::artifacts::ArtifactStorage;
use crate::infra::db::SqliteStore;

#[derive(Clone)]
pub struct ApiState {
    pub queue: QueueService,
    pub db: SqliteStore,
    pub artifacts: Arc<ArtifactStorage>,
}
