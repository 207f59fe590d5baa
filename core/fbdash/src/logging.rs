//! Log setup: stderr plus a daily rolling file under `~/.fbdash/logs`.
//!
//! `FBDASH_DEBUG_LOG=1` forces debug level; otherwise `RUST_LOG` applies,
//! defaulting to info.

use std::env;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub const DEBUG_LOG_ENV_VAR: &str = "FBDASH_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "fbdash.log";

fn debug_enabled(value: Option<&str>) -> bool {
    matches!(value, Some("1" | "true" | "TRUE" | "yes" | "YES"))
}

fn build_filter() -> EnvFilter {
    if debug_enabled(env::var(DEBUG_LOG_ENV_VAR).ok().as_deref()) {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Installs the global subscriber. Keep the returned guard alive in `main`;
/// dropping it flushes the file writer.
///
/// When the log directory can't be created, logs go to stderr only.
pub fn init(logs_dir: &Path) -> Option<WorkerGuard> {
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (file_layer, guard) = match fs_err::create_dir_all(logs_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        Err(err) => {
            eprintln!("fbdash: file logging disabled: {}", err);
            (None, None)
        }
    };

    if tracing_subscriber::registry()
        .with(build_filter())
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .is_err()
    {
        eprintln!("fbdash: logging already initialized");
    }

    guard
}
