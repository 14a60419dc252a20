pub mod cleanup;
pub mod runner;

pub use cleanup::CleanupSweeper;
pub use runner::Worker;

pub use crate::domain::entities::{HEARTBEAT_STALE_AFTER, WORKER_ID};
