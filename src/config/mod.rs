//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueHint};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::domain::types::{
    JOB_TIMEOUT_RANGE, JobDefaults, MAX_DOMAIN_WAIT_RANGE, MAX_RETRIES_RANGE,
    NAVIGATION_TIMEOUT_RANGE, RenderMode,
};

const LOCAL_CONFIG_BASENAME: &str = "stampa";
const DEFAULT_DB_PATH: &str = "./data/stampa.db";
const DEFAULT_PDF_STORAGE_PATH: &str = "./data/pdfs";
const DEFAULT_RENDER_MODE: &str = "print_to_pdf";
const DEFAULT_NAVIGATION_TIMEOUT_SECONDS: i64 = 45;
const DEFAULT_JOB_TIMEOUT_SECONDS: i64 = 120;
const DEFAULT_MAX_DOMAIN_WAIT_SECONDS: i64 = 600;
const DEFAULT_MAX_RETRIES: i32 = 2;
const DEFAULT_CLEANUP_INTERVAL_SECONDS: u64 = 1020;
const DEFAULT_CLEANUP_FILE_AGE_SECONDS: u64 = 1020;
const DEFAULT_API_HOST: &str = "0.0.0.0";
const DEFAULT_API_PORT: u16 = 8000;
const DEFAULT_WORKER_POLL_INTERVAL_SECONDS: u64 = 2;
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_CHROMIUM_PATH: &str = "chromium";

/// Command-line arguments for the stampa binary.
#[derive(Debug, Parser)]
#[command(name = "stampa", version, about = "Webpage-to-PDF conversion service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "STAMPA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP API process.
    Serve(ServeArgs),
    /// Run the single worker process (render loop + cleanup sweep).
    Worker(WorkerArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the SQLite database file path.
    #[arg(long = "db-path", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub db_path: Option<PathBuf>,

    /// Override the PDF artifact directory.
    #[arg(long = "pdf-storage-path", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub pdf_storage_path: Option<PathBuf>,

    /// Override the API listener host.
    #[arg(long = "api-host", value_name = "HOST")]
    pub api_host: Option<String>,

    /// Override the API listener port.
    #[arg(long = "api-port", value_name = "PORT")]
    pub api_port: Option<u16>,

    /// Override the headless Chromium executable used for rendering.
    #[arg(long = "chromium-path", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub chromium_path: Option<PathBuf>,

    /// Override the worker poll interval in seconds.
    #[arg(long = "worker-poll-interval-seconds", value_name = "SECONDS")]
    pub worker_poll_interval_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub storage: StorageSettings,
    pub render: RenderSettings,
    pub jobs: JobDefaults,
    pub worker: WorkerSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen_addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub pdf_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub chromium_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub cleanup_interval: Duration,
    pub cleanup_file_age: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Parse the CLI and load settings with the configured precedence.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let cli = CliArgs::parse();
    let settings = load(&cli)?;
    Ok((cli, settings))
}

/// Load settings from optional config files, flat environment variables
/// (`DB_PATH`, `API_PORT`, …), and CLI overrides, in that order.
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder =
        Config::builder().add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::default().try_parsing(true));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_overrides(&args.overrides),
        Some(Command::Worker(args)) => raw.apply_overrides(&args.overrides),
        None => {}
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    db_path: Option<PathBuf>,
    pdf_storage_path: Option<PathBuf>,
    default_render_mode: Option<String>,
    navigation_timeout_seconds: Option<i64>,
    job_timeout_seconds: Option<i64>,
    max_domain_wait_seconds: Option<i64>,
    max_retries: Option<i32>,
    cleanup_interval_seconds: Option<u64>,
    cleanup_file_age_seconds: Option<u64>,
    api_host: Option<String>,
    api_port: Option<u16>,
    worker_poll_interval_seconds: Option<u64>,
    log_level: Option<String>,
    log_json: Option<bool>,
    chromium_path: Option<PathBuf>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(path) = overrides.db_path.as_ref() {
            self.db_path = Some(path.clone());
        }
        if let Some(path) = overrides.pdf_storage_path.as_ref() {
            self.pdf_storage_path = Some(path.clone());
        }
        if let Some(host) = overrides.api_host.as_ref() {
            self.api_host = Some(host.clone());
        }
        if let Some(port) = overrides.api_port {
            self.api_port = Some(port);
        }
        if let Some(path) = overrides.chromium_path.as_ref() {
            self.chromium_path = Some(path.clone());
        }
        if let Some(seconds) = overrides.worker_poll_interval_seconds {
            self.worker_poll_interval_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.log_level = Some(level.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let host = raw.api_host.unwrap_or_else(|| DEFAULT_API_HOST.to_string());
        let ip = IpAddr::from_str(&host)
            .map_err(|err| LoadError::invalid("api_host", err.to_string()))?;
        let listen_addr = SocketAddr::new(ip, raw.api_port.unwrap_or(DEFAULT_API_PORT));

        let level_source = raw
            .log_level
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
        let level = LevelFilter::from_str(&level_source).map_err(|_| {
            LoadError::invalid("log_level", format!("unknown level `{level_source}`"))
        })?;
        let format = if raw.log_json.unwrap_or(false) {
            LogFormat::Json
        } else {
            LogFormat::Compact
        };

        let mode_source = raw
            .default_render_mode
            .unwrap_or_else(|| DEFAULT_RENDER_MODE.to_string());
        let render_mode = RenderMode::try_from(mode_source.as_str()).map_err(|_| {
            LoadError::invalid(
                "default_render_mode",
                format!("unknown render mode `{mode_source}`"),
            )
        })?;

        let jobs = JobDefaults {
            render_mode,
            navigation_timeout_seconds: in_range_i64(
                "navigation_timeout_seconds",
                raw.navigation_timeout_seconds
                    .unwrap_or(DEFAULT_NAVIGATION_TIMEOUT_SECONDS),
                NAVIGATION_TIMEOUT_RANGE,
            )?,
            job_timeout_seconds: in_range_i64(
                "job_timeout_seconds",
                raw.job_timeout_seconds
                    .unwrap_or(DEFAULT_JOB_TIMEOUT_SECONDS),
                JOB_TIMEOUT_RANGE,
            )?,
            max_domain_wait_seconds: in_range_i64(
                "max_domain_wait_seconds",
                raw.max_domain_wait_seconds
                    .unwrap_or(DEFAULT_MAX_DOMAIN_WAIT_SECONDS),
                MAX_DOMAIN_WAIT_RANGE,
            )?,
            max_retries: in_range_i32(
                "max_retries",
                raw.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
                MAX_RETRIES_RANGE,
            )?,
        };

        let worker = WorkerSettings {
            poll_interval: nonzero_duration(
                "worker_poll_interval_seconds",
                raw.worker_poll_interval_seconds
                    .unwrap_or(DEFAULT_WORKER_POLL_INTERVAL_SECONDS),
            )?,
            cleanup_interval: nonzero_duration(
                "cleanup_interval_seconds",
                raw.cleanup_interval_seconds
                    .unwrap_or(DEFAULT_CLEANUP_INTERVAL_SECONDS),
            )?,
            cleanup_file_age: nonzero_duration(
                "cleanup_file_age_seconds",
                raw.cleanup_file_age_seconds
                    .unwrap_or(DEFAULT_CLEANUP_FILE_AGE_SECONDS),
            )?,
        };

        Ok(Settings {
            server: ServerSettings { listen_addr },
            logging: LoggingSettings { level, format },
            database: DatabaseSettings {
                path: raw
                    .db_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            },
            storage: StorageSettings {
                pdf_dir: raw
                    .pdf_storage_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_PDF_STORAGE_PATH)),
            },
            render: RenderSettings {
                chromium_path: raw
                    .chromium_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CHROMIUM_PATH)),
            },
            jobs,
            worker,
        })
    }

    /// Create the database parent directory so SQLite can open its file.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        if let Some(parent) = self.database.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

fn in_range_i64(key: &'static str, value: i64, (low, high): (i64, i64)) -> Result<i64, LoadError> {
    if (low..=high).contains(&value) {
        Ok(value)
    } else {
        Err(LoadError::invalid(
            key,
            format!("{value} is outside the supported range {low}..={high}"),
        ))
    }
}

fn in_range_i32(key: &'static str, value: i32, (low, high): (i32, i32)) -> Result<i32, LoadError> {
    if (low..=high).contains(&value) {
        Ok(value)
    } else {
        Err(LoadError::invalid(
            key,
            format!("{value} is outside the supported range {low}..={high}"),
        ))
    }
}

fn nonzero_duration(key: &'static str, seconds: u64) -> Result<Duration, LoadError> {
    if seconds == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(seconds))
}
