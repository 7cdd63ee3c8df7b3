use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing subscriber with optional JSON output.
///
/// Logs go to stderr so stdout carries only the run summary. With a log
/// directory, a daily-rolling JSON file is written as well; keep the returned
/// guard alive until shutdown so buffered lines are flushed.
pub fn init_tracing(json_output: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,motion_aware=debug,motion_core=debug"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "motion-aware.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    if json_output {
        tracing_subscriber::registry()
            .with(file_layer)
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(file_layer)
            .with(filter)
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .init();
    }
    guard
}
