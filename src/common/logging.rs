//! Logging and tracing configuration
//!
//! Console logging for every command, plus a file log for long-running
//! verification and release runs so host-side failures can be inspected after
//! the run is over.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use super::paths;

const DEFAULT_FILTER: &str = "pluginctl=info,warn";

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Initialize tracing for the CLI (stderr logging)
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate, WARN for dependencies.
pub fn init_cli() {
    tracing_subscriber::registry()
        .with(env_filter(DEFAULT_FILTER))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
}

/// Initialize tracing with an additional log file
///
/// The file receives DEBUG for this crate so control-channel round trips are
/// recorded. The returned guard must be held until the run finishes or
/// buffered lines are lost. Falls back to [`init_cli`] when no log directory
/// is available.
pub fn init_with_file(file_name: &str) -> Option<(PathBuf, WorkerGuard)> {
    let log_dir = match paths::ensure_log_dir() {
        Ok(Some(dir)) => dir,
        Ok(None) => {
            init_cli();
            return None;
        }
        Err(e) => {
            eprintln!("Warning: Could not create log directory: {}", e);
            init_cli();
            return None;
        }
    };

    let appender = tracing_appender::rolling::never(&log_dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_filter(env_filter("pluginctl=debug,info"));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(env_filter(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .init();

    Some((log_dir.join(file_name), guard))
}
