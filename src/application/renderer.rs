//! Abstract rendering capability: the core never learns how PDF bytes are
//! produced, only whether a failure is worth retrying.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::domain::types::RenderMode;

#[derive(Debug, Error)]
pub enum RenderError {
    /// Worth retrying: navigation timeout, network error, renderer hiccup.
    #[error("transient render failure: {0}")]
    Transient(String),
    /// Not worth retrying: misconfiguration or content the renderer cannot
    /// ever produce a PDF for.
    #[error("permanent render failure: {0}")]
    Permanent(String),
}

impl RenderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RenderError::Transient(_))
    }
}

#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub url: String,
    pub mode: RenderMode,
    pub navigation_timeout: Duration,
}

/// Produces PDF bytes from a URL. Implementations must honor the
/// navigation timeout; the overall job deadline is enforced by the caller.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, request: RenderRequest) -> Result<Bytes, RenderError>;
}
