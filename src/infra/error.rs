use thiserror::Error;

/// Failures raised while bringing up or talking to process infrastructure.
///
/// Variants carry their causes as typed sources rather than flattened
/// strings so `main` can report the full chain.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("job database unavailable")]
    Database(#[source] sqlx::Error),
    #[error("job database migration failed")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("tracing subscriber could not be installed")]
    Telemetry(#[source] tracing_subscriber::util::TryInitError),
    #[error("{context}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl InfraError {
    pub fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }
}
