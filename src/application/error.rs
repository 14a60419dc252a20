use axum::response::Response;
use thiserror::Error;

use crate::application::repos::RepoError;
use crate::config::LoadError;
use crate::infra::error::InfraError;

/// Diagnostic attached to error responses so the logging middleware can
/// report where a failure originated without leaking it to the client.
/// The response itself already carries the status.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub detail: String,
}

impl ErrorReport {
    pub fn new(source: &'static str, detail: impl Into<String>) -> Self {
        Self {
            source,
            detail: detail.into(),
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Process-level failures surfaced from `main`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration rejected")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
