//! Logging configuration and subscriber setup shared by the binaries.

use std::env;

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::SyncConfig;
use crate::ingest::IngestReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Unparseable format or target values keep their defaults.
pub fn logging_config_from_env() -> LoggingConfig {
    let mut config = LoggingConfig::default();

    if let Ok(level) = env::var("CANDLE_LOG_LEVEL") {
        let trimmed = level.trim();
        if !trimmed.is_empty() {
            config.level = trimmed.to_string();
        }
    }
    if let Some(format) = env::var("CANDLE_LOG_FORMAT")
        .ok()
        .and_then(|raw| parse_log_format(&raw))
    {
        config.format = format;
    }
    if let Some(include_target) = env::var("CANDLE_LOG_TARGET")
        .ok()
        .and_then(|raw| parse_bool(&raw))
    {
        config.include_target = include_target;
    }

    config
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_ansi(matches!(config.format, LogFormat::Pretty))
        .with_writer(std::io::stderr);

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    Ok(())
}

pub fn log_app_start(app: &'static str, logging: &LoggingConfig, sync: &SyncConfig) {
    info!(
        component = app,
        event = "app.start",
        log_level = %logging.level,
        log_format = ?logging.format,
        source = sync.source.as_str(),
        bar = sync.interval.label(),
        inst_count = sync.inst_ids.len(),
        data_root = %sync.store.data_root.display(),
        proxy = sync.fetcher.proxy.is_some()
    );
}

/// One summary line per dataset, emitted after each run.
pub fn log_ingest_summary(app: &'static str, report: &IngestReport) {
    info!(
        component = app,
        event = "dataset.summary",
        inst_id = %report.inst_id,
        bar = %report.bar,
        success = report.success,
        complete = report.complete,
        rows = report.rows,
        added = report.added,
        stop_reason = report.stop_reason.map(|s| s.as_str()).unwrap_or("none"),
        path = %report.path.display()
    );
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
