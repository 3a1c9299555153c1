use std::path::Path;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use super::file_logger::FileLogger;

/// Initialize structured logging with tracing.
///
/// Log level can be controlled via RUST_LOG env var.
/// Default level is "info". When `log_dir` is given, every event is also
/// appended as one JSON line to a daily file in that directory.
pub fn init_logging(log_dir: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = log_dir.map(|dir| {
        let logger = FileLogger::new(dir.to_path_buf());
        logger.cleanup_old_logs();
        fmt::layer().json().with_writer(logger)
    });

    // try_init: tests and the CLI may both end up here
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .with(filter)
        .try_init();
}
