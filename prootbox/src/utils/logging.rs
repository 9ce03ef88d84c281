//! # Logging Initialization
//!
//! `init_logging()` installs the global `tracing` subscriber exactly once
//! (guarded by `std::sync::Once`); later calls are no-ops.
//!
//! The filter comes from `RUST_LOG` when set, otherwise from the requested
//! level for every crate including `prootbox`. Output goes to stderr, or with
//! `log_to_file` to a daily rolling `prootbox.log` in the user cache
//! directory (falling back to stderr when that directory is unusable).
//!
//! The launcher defaults to `warn` so the sandboxed program's own output on
//! the inherited streams is not interleaved with diagnostics.

use directories::ProjectDirs;
use std::path::Path;
use std::{io::stderr, sync::Once};
use tracing_subscriber::{EnvFilter, fmt::layer, prelude::*};

static INIT: Once = Once::new();

const LOG_FILE_NAME: &str = "prootbox.log";

pub fn init_test_logging() {
    init_logging("trace", false);
}

/// Initializes the logging system.
///
/// ANSI colors are used only when writing to stderr.
pub fn init_logging(log_level: &str, log_to_file: bool) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{log_level},prootbox={log_level}")));

        let log_dir = if log_to_file { writable_log_dir() } else { None };

        // catch_unwind: tracing_appender panics when the file cannot be opened.
        let appender = log_dir.and_then(|dir| {
            std::panic::catch_unwind(|| tracing_appender::rolling::daily(&dir, LOG_FILE_NAME)).ok()
        });

        match appender {
            Some(file_appender) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer().with_writer(non_blocking).with_ansi(false))
                    .init();
                // Leaked so buffered lines are flushed for the life of the process.
                Box::leak(Box::new(guard));
            }
            None => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer().with_writer(stderr).with_ansi(true))
                    .init();
            }
        }
    });
}

fn writable_log_dir() -> Option<std::path::PathBuf> {
    let proj_dirs = ProjectDirs::from("org", "prootbox", "prootbox")?;
    let log_dir = proj_dirs.cache_dir();
    (std::fs::create_dir_all(log_dir).is_ok() && test_write_permission(log_dir))
        .then(|| log_dir.to_path_buf())
}

fn test_write_permission(dir: &Path) -> bool {
    tempfile::tempfile_in(dir).is_ok()
}
