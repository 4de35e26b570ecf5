//! Tracing setup for binaries and tools embedding the diary service.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use quire_config::LoggingConfig;

/// Log file prefix inside `json_dir`.
pub const LOG_FILE_NAME: &str = "quire.log";

/// Install the global subscriber: a human-readable console layer plus, when
/// `json_dir` is set, a daily-rolling JSON file layer.
///
/// `RUST_LOG` overrides `config.filter` for the console. Keep the returned
/// guard alive for as long as file logging should flush. Calling this twice
/// is harmless; the second call leaves the first subscriber in place.
pub fn init_tracing(config: &LoggingConfig) -> Option<WorkerGuard> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let console = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_filter(console_filter);

    let (file, guard) = match &config.json_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(EnvFilter::new(
                    "quire_diary=trace,quire_store=debug,quire_authz=debug,quire_embed=debug,info",
                ));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(json = guard.is_some(), "Tracing initialized");
    }
    guard
}
