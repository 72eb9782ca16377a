//! Tracing configuration and log routing.
//!
//! Logs go to stdout with a compact formatter and to a file. The file is taken from the
//! explicit argument, then `DOCSTAGE_LOG_FILE`, then `logs/docstage.log`.
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_FILE_VAR: &str = "DOCSTAGE_LOG_FILE";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_NAME: &str = "docstage.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install stdout and file subscribers. `RUST_LOG` filters, defaulting to `info`.
///
/// Calling it again after a subscriber is installed is a no-op.
pub fn init_tracing(log_file: Option<&Path>) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    let path = log_path(log_file);
    let installed = if let Some(writer) = configure_file_writer(&path) {
        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .compact();
        registry.with(file_layer).try_init()
    } else {
        registry.try_init()
    };

    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Log file for this process, reading `DOCSTAGE_LOG_FILE` from the current environment.
pub fn log_path(explicit: Option<&Path>) -> PathBuf {
    resolve_log_path(explicit, std::env::var(LOG_FILE_VAR).ok())
}

/// Pick the log file: explicit path, then the environment value, then the default.
pub fn resolve_log_path(explicit: Option<&Path>, from_env: Option<String>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| {
            from_env
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| Path::new(DEFAULT_LOG_DIR).join(DEFAULT_LOG_NAME))
}

/// Returns `None` when the parent directory cannot be created or the file cannot be opened.
fn configure_file_writer(path: &Path) -> Option<NonBlocking> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty())
        && let Err(err) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create log directory {}: {err}", parent.display());
        return None;
    }

    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
    {
        Ok(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let _ = LOG_GUARD.set(guard);
            Some(non_blocking)
        }
        Err(err) => {
            eprintln!("Failed to open log file {}: {err}", path.display());
            None
        }
    }
}
