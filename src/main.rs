use std::error::Error as StdError;
use std::process;
use std::sync::Arc;

use stampa::application::error::AppError;
use stampa::application::queue::QueueService;
use stampa::application::repos::JobStore;
use stampa::config;
use stampa::infra::artifacts::ArtifactStorage;
use stampa::infra::db::SqliteStore;
use stampa::infra::error::InfraError;
use stampa::infra::http::{self, ApiState};
use stampa::infra::render::ChromiumRenderer;
use stampa::infra::telemetry;
use stampa::worker::{CleanupSweeper, Worker};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

const DB_MAX_CONNECTIONS: u32 = 8;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let mut chain = Vec::new();
    let mut current = StdError::source(error);
    while let Some(cause) = current {
        chain.push(cause.to_string());
        current = cause.source();
    }

    if dispatcher::has_been_set() {
        error!(error = %error, chain = ?chain, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, chain = ?chain, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(config::ServeArgs::default()));

    telemetry::init(&settings.logging)?;
    settings
        .ensure_directories()
        .map_err(|err| InfraError::io("failed to create data directories", err))?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Worker(_) => run_worker(settings).await,
    }
}

async fn init_store(settings: &config::Settings) -> Result<SqliteStore, AppError> {
    let pool = SqliteStore::connect(&settings.database.path, DB_MAX_CONNECTIONS)
        .await
        .map_err(InfraError::Database)?;

    SqliteStore::run_migrations(&pool)
        .await
        .map_err(InfraError::Migration)?;

    Ok(SqliteStore::new(pool))
}

fn init_artifacts(settings: &config::Settings) -> Result<Arc<ArtifactStorage>, AppError> {
    let storage = ArtifactStorage::new(settings.storage.pdf_dir.clone())
        .map_err(|err| InfraError::io("failed to prepare artifact storage", err))?;
    Ok(Arc::new(storage))
}

fn build_queue(store: &SqliteStore, settings: &config::Settings) -> QueueService {
    let store: Arc<dyn JobStore> = Arc::new(store.clone());
    QueueService::new(store, settings.jobs.clone())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let store = init_store(&settings).await?;
    let artifacts = init_artifacts(&settings)?;
    let queue = build_queue(&store, &settings);

    let state = ApiState {
        queue,
        db: store,
        artifacts,
    };
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.listen_addr)
        .await
        .map_err(|err| InfraError::io("failed to bind API listener", err))?;

    info!(
        target = "stampa::serve",
        addr = %settings.server.listen_addr,
        "API listening"
    );

    axum::serve(listener, router.into_make_service())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn run_worker(settings: config::Settings) -> Result<(), AppError> {
    let store = init_store(&settings).await?;
    let artifacts = init_artifacts(&settings)?;
    let queue = build_queue(&store, &settings);

    let renderer = Arc::new(ChromiumRenderer::new(settings.render.chromium_path.clone()));
    let worker = Worker::new(
        queue,
        renderer,
        artifacts.clone(),
        settings.worker.poll_interval,
    )?;

    let sweeper = CleanupSweeper::new(
        Arc::new(store.clone()) as Arc<dyn JobStore>,
        artifacts,
        settings.worker.cleanup_interval,
        settings.worker.cleanup_file_age,
    );

    tokio::select! {
        result = worker.run() => result,
        _ = sweeper.run() => Ok(()),
        _ = tokio::signal::ctrl_c() => {
            info!(target = "stampa::worker", "shutdown signal received");
            Ok(())
        }
    }
}
