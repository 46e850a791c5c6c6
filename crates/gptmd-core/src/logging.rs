//! Tracing subscriber setup.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;
use crate::files::expand_home;

/// Picks the filter directive used when `RUST_LOG` is unset.
///
/// `-v` / `-vv` win over the configured level; without either the config
/// level applies, else `warn`.
pub fn default_directive(config: &LoggingConfig, verbosity: u8) -> String {
    match verbosity {
        0 => config
            .level
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or("warn")
            .to_string(),
        1 => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Installs the global subscriber: compact stderr output plus an optional
/// log file.
///
/// Keep the returned guard alive until exit; dropping it flushes the file writer.
///
/// # Errors
/// Returns an error if the log file directory cannot be created or a global
/// subscriber is already installed.
pub fn init(config: &LoggingConfig, verbosity: u8) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config, verbosity)));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let (file_layer, guard) = match config.file.as_deref().map(str::trim) {
        Some(file) if !file.is_empty() => {
            let path = expand_home(file);
            let (writer, guard) = file_writer(&path)?;
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

fn file_writer(path: &Path) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .with_context(|| format!("Log file path has no file name: {}", path.display()))?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let appender = tracing_appender::rolling::never(dir, name);
    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        let none = LoggingConfig::default();
        assert_eq!(default_directive(&none, 0), "warn");
        assert_eq!(default_directive(&none, 1), "info");
        assert_eq!(default_directive(&none, 5), "debug");

        let configured = LoggingConfig {
            level: Some("gptmd_core=trace".into()),
            file: None,
        };
        assert_eq!(default_directive(&configured, 0), "gptmd_core=trace");
        assert_eq!(default_directive(&configured, 1), "info");
    }

    #[test]
    fn test_file_writer_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("gptmd.log");
        let (_writer, _guard) = file_writer(&path).unwrap();
        assert!(dir.path().join("logs").is_dir());
    }
}
