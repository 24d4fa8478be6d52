//! Process-wide logger setup.
//!
//! Installs a tracing subscriber writing human-readable records to the
//! console and JSON records to a timestamped file, one file per process run.
//! The level filter comes from `RUST_LOG` and defaults to `info`.

use std::fs;
use std::path::Path;

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::AnveshakError;

pub const DEFAULT_LOG_DIR: &str = "logs";

/// Install the global subscriber, logging to the console and to a
/// `<YYYY-MM-DD_HH-MM-SS>.log` file under `log_dir` (created if missing).
///
/// The returned guard flushes the file appender and must be held for the
/// life of the process. Calling this again after a subscriber is installed
/// opens a new log file but leaves the existing subscriber in place.
pub fn init_logging(log_dir: &Path) -> Result<WorkerGuard, AnveshakError> {
    fs::create_dir_all(log_dir).map_err(|e| {
        AnveshakError::wrap(
            format!("Failed to create log directory {}: {e}", log_dir.display()),
            &e,
        )
    })?;

    let file_name = format!("{}.log", Local::now().format("%Y-%m-%d_%H-%M-%S"));
    let log_file = fs::File::create(log_dir.join(&file_name)).map_err(|e| {
        AnveshakError::wrap(format!("Failed to create log file {file_name}: {e}"), &e)
    })?;
    let (file_writer, guard) = tracing_appender::non_blocking(log_file);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = tracing_subscriber::fmt::layer().with_target(true);
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(file_writer);

    // try_init fails when a dispatcher is already set; that is not an error
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    Ok(guard)
}

/// [`init_logging`] into the default `logs` directory under the working
/// directory.
pub fn init_default_logging() -> Result<WorkerGuard, AnveshakError> {
    init_logging(Path::new(DEFAULT_LOG_DIR))
}
