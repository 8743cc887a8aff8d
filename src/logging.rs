use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_FILE: &str = "toilet-radar.log";

/// Sends all tracing output to a daily rotated file under `dir`.
///
/// The terminal belongs to the UI, so nothing goes to stdout. `RUST_LOG`
/// overrides the default of `info` for this crate and `warn` for everything
/// else. Keep the returned guard alive until exit or buffered lines are lost.
pub fn initialize_logging(dir: impl AsRef<Path>) -> WorkerGuard {
    let dir = dir.as_ref();
    let _ = std::fs::create_dir_all(dir);

    let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,toilet_radar=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false).with_target(true))
        .init();

    tracing::info!("Logging to {}", dir.join(LOG_FILE).display());
    guard
}
