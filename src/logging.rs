//! Tracing setup for the CLI and for hosts embedding the worker.
//!
//! Events go to stdout in compact form and to an append-only log file. Tree builds run on the
//! worker's own thread while retrieval runs on the caller's runtime, so the file layer keeps
//! targets (`raptor_rag::tree`, `raptor_rag::worker`, `raptor_rag::retrieval`) to tell them
//! apart, and writes through a non-blocking appender.
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter used when `RUST_LOG` is unset: this crate at `info`, HTTP and runtime crates at `warn`.
pub const DEFAULT_FILTER: &str = "warn,raptor_rag=info,raptor=info";

const LOG_FILE_VAR: &str = "RAPTOR_LOG_FILE";
const DEFAULT_LOG_FILE: &str = "logs/raptor.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the stdout and file subscribers.
///
/// `RUST_LOG` overrides [`DEFAULT_FILTER`]. The file writer's guard lives for the rest of the
/// process. A second call leaves the first subscriber in place.
pub fn init_tracing() {
    let stdout_layer = fmt::layer().with_target(false).compact();
    let registry = tracing_subscriber::registry()
        .with(env_filter())
        .with(stdout_layer);

    let path = log_file_path(std::env::var(LOG_FILE_VAR).ok());
    let installed = match file_writer(&path) {
        Some(writer) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .compact();
            registry.with(file_layer).try_init()
        }
        None => registry.try_init(),
    };

    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Log file location: the configured path, or `logs/raptor.log`.
fn log_file_path(configured: Option<String>) -> PathBuf {
    configured
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_LOG_FILE), PathBuf::from)
}

/// Open `path` for appending, creating its directory first.
///
/// Returns `None` when the directory or file cannot be created; logging then stays on stdout.
fn file_writer(path: &Path) -> Option<NonBlocking> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty())
        && let Err(err) = std::fs::create_dir_all(dir)
    {
        eprintln!("Failed to create log directory {}: {err}", dir.display());
        return None;
    }

    match std::fs::OpenOptions::new().create(true).append(true).open(path) {
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
