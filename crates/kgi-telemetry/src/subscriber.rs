//! Subscriber assembly: console layer plus optional rolling file layers.

use std::fs;
use std::path::Path;

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::{TelemetryConfig, TelemetryError};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Keeps the non-blocking file writers alive.
///
/// Dropping the guard flushes buffered log lines. Hold it for the lifetime of
/// the process.
pub struct TelemetryGuard {
    file_guards: Vec<WorkerGuard>,
}

impl TelemetryGuard {
    /// Whether any log file is being written.
    pub fn file_logging(&self) -> bool {
        !self.file_guards.is_empty()
    }
}

/// Install the global subscriber.
///
/// Fails if a global subscriber is already installed, the level filter does
/// not parse, or the log directory cannot be created.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let (layers, guard) = build_layers(&config)?;

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| TelemetryError::Install(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        level = %config.log_level,
        json = config.json_logs,
        log_dir = ?config.log_dir,
        "Logging initialized"
    );

    Ok(guard)
}

pub(crate) fn build_layers(
    config: &TelemetryConfig,
) -> Result<(Vec<BoxedLayer>, TelemetryGuard), TelemetryError> {
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut file_guards = Vec::new();

    if config.console_output {
        layers.push(console_layer(config)?);
    }

    if let Some(dir) = &config.log_dir {
        fs::create_dir_all(dir).map_err(|e| TelemetryError::LogDir {
            path: dir.display().to_string(),
            message: e.to_string(),
        })?;

        let (writer, guard) = file_writer(dir, &config.service_name)?;
        file_guards.push(guard);
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer)
                .with_filter(env_filter(config)?)
                .boxed(),
        );

        let (err_writer, err_guard) = file_writer(dir, &format!("{}_err", config.service_name))?;
        file_guards.push(err_guard);
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(err_writer)
                .with_filter(LevelFilter::WARN)
                .boxed(),
        );
    }

    Ok((
        layers,
        TelemetryGuard {
            file_guards,
        },
    ))
}

fn console_layer(config: &TelemetryConfig) -> Result<BoxedLayer, TelemetryError> {
    let filter = env_filter(config)?;
    let layer = if config.json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .with_filter(filter)
            .boxed()
    };
    Ok(layer)
}

fn env_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(&config.log_level).map_err(|e| TelemetryError::Filter {
        filter: config.log_level.clone(),
        message: e.to_string(),
    })
}

fn file_writer(dir: &Path, prefix: &str) -> Result<(NonBlocking, WorkerGuard), TelemetryError> {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .build(dir)
        .map_err(|e| TelemetryError::LogDir {
            path: dir.display().to_string(),
            message: e.to_string(),
        })?;
    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_only_has_no_file_guards() {
        let config = TelemetryConfig::default();
        let (layers, guard) = build_layers(&config).unwrap();
        assert_eq!(layers.len(), 1);
        assert!(!guard.file_logging());
    }

    #[test]
    fn test_log_dir_adds_main_and_error_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = TelemetryConfig {
            log_dir: Some(dir.path().join("logs")),
            ..TelemetryConfig::default()
        };

        let (layers, guard) = build_layers(&config).unwrap();
        assert_eq!(layers.len(), 3);
        assert!(guard.file_logging());
        assert!(dir.path().join("logs").is_dir());
    }

    #[test]
    fn test_invalid_filter_is_rejected() {
        let config = TelemetryConfig {
            log_level: "kgi=loud".to_string(),
            ..TelemetryConfig::default()
        };
        assert!(matches!(
            build_layers(&config),
            Err(TelemetryError::Filter { .. })
        ));
    }
}
