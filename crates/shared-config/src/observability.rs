use std::path::Path;

use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::LoggingConfig;

/// Initialize `tracing` for one of the workspace's binaries: an
/// `EnvFilter` seeded from `config.level` (or `RUST_LOG` if set), a
/// console layer, and — when `config.file` names a path — an additional
/// daily-rotating file layer via `tracing-appender`. Returns the
/// non-blocking writer guard; the caller must hold onto it for the
/// lifetime of the process or log lines will be dropped on shutdown.
pub fn init_logging(config: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match (&config.file, config.json) {
        (Some(file_path), json) => {
            let path = Path::new(file_path);
            let directory = path.parent().unwrap_or_else(|| Path::new("."));
            let filename = path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("muse.log"));

            let file_appender = rolling::daily(directory, filename);
            let (file_writer, guard) = non_blocking(file_appender);

            if json {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json().with_writer(file_writer))
                    .with(fmt::layer().json())
                    .init();
            } else {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_writer(file_writer))
                    .with(fmt::layer())
                    .init();
            }
            Some(guard)
        }
        (None, true) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
            None
        }
        (None, false) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer())
                .init();
            None
        }
    }
}
