//! # Structured Logging Module
//!
//! Environment-aware structured logging that writes to the console and to a
//! JSON log file, so long running orchestrator processes leave a trail of
//! every backend command and state transition.

use chrono::Utc;
use std::path::PathBuf;
use std::process;
use parking_lot::Mutex;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INIT: OnceLock<()> = OnceLock::new();
static LOGGER_GUARD: Mutex<Option<WorkerGuard>> = parking_lot::const_mutex(None);

/// Initialize structured logging with environment-specific configuration.
///
/// Safe to call more than once; only the first call installs the subscriber.
pub fn init_structured_logging() {
    init_logging(true);
}

/// File-only logging, for processes whose stderr is read by a caller.
pub fn init_file_logging() {
    init_logging(false);
}

fn init_logging(console: bool) {
    LOGGER_INIT.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);
        let filter = || {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level))
        };

        let log_dir = PathBuf::from("log");
        let pid = process::id();
        // Single-job invocations append to a shared daily file.
        let log_filename = if console {
            let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
            format!("{environment}.{pid}.{timestamp}.log")
        } else {
            format!("{environment}.execution.log")
        };

        let console_layer = console.then(|| {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_writer(std::io::stderr)
                .with_filter(filter())
        });

        // A read-only working directory should not prevent the process from logging.
        let (file_layer, guard) = match std::fs::create_dir_all(&log_dir) {
            Ok(()) => {
                let appender = if console {
                    tracing_appender::rolling::never(&log_dir, &log_filename)
                } else {
                    tracing_appender::rolling::daily(&log_dir, &log_filename)
                };
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(filter());
                (Some(layer), Some(guard))
            }
            Err(_) => (None, None),
        };

        if tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(
            pid,
            environment = %environment,
            log_file = %log_dir.join(&log_filename).display(),
            "Structured logging initialized"
        );

        *LOGGER_GUARD.lock() = guard;
    });
}

/// Flush and close the log file. Statics are never dropped, so a process
/// must call this before exiting or lose its last buffered events.
pub fn shutdown_logging() {
    drop(LOGGER_GUARD.lock().take());
}

/// Current environment name.
pub fn get_environment() -> String {
    std::env::var("CLUSTERPOST_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for a lifecycle operation on a job.
pub fn log_job_operation(
    operation: &str,
    job_id: &str,
    execution_server: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        job_id = %job_id,
        execution_server = execution_server,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "JOB_OPERATION"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_by_environment() {
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
    }

    #[test]
    fn test_shutdown_without_init_is_harmless() {
        shutdown_logging();
        shutdown_logging();
        assert!(LOGGER_GUARD.lock().is_none());
    }
}
