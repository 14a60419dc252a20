pub mod error;
pub mod handlers;
pub mod models;
mod state;

pub use state::ApiState;

use std::time::Instant;

use axum::{
    Router,
    body::Body,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use tracing::{error, warn};

use crate::application::error::ErrorReport;

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/v1/pdf-jobs", post(handlers::submit_job))
        .route("/v1/pdf-jobs/{job_id}", get(handlers::get_job))
        .route("/v1/pdf-jobs/{job_id}/file", get(handlers::download_pdf))
        .route("/healthz", get(handlers::healthz))
        .layer(middleware::from_fn(log_responses))
        .with_state(state)
}

/// Emit one structured line per failed request, using the [`ErrorReport`]
/// the handler attached to the response.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let mut response = next.run(request).await;
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        let elapsed_ms = start.elapsed().as_millis();
        let report = response.extensions_mut().remove::<ErrorReport>();
        let (source, detail) = match report {
            Some(report) => (report.source, report.detail),
            None => ("unknown", "no diagnostic available".to_string()),
        };

        if status.is_server_error() {
            error!(
                target = "stampa::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                "request failed",
            );
        } else {
            warn!(
                target = "stampa::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                "client request error",
            );
        }
    }

    response
}
