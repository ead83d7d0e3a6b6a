use std::io;
use std::path::Path;
use std::sync::Once;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_LOG_FILTER: &str = "info";

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to create log directory `{path}`: {source}")]
    LogDirectory {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to create the rolling log file: {0}")]
    LogFile(#[from] InitError),

    #[error("failed to bridge `log` records into tracing: {0}")]
    LogTracer(#[from] tracing_log::log::SetLoggerError),

    #[error("failed to install the global tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

/// Keeps the background log writer alive; buffered lines are flushed when it is dropped.
#[must_use = "dropping the flusher stops writing the log file"]
pub struct LogFlusher {
    _guard: Option<WorkerGuard>,
}

/// Installs the global subscriber for a binary.
///
/// Events go to stdout and, when `log_dir` is given, to a daily rolling file named
/// `<app_name>.log.<date>` inside it. The filter comes from `RUST_LOG` and defaults to `info`.
/// Records emitted through the `log` crate (for example by `tokio-postgres`) are forwarded.
pub fn init_tracing(app_name: &str, log_dir: Option<&Path>) -> Result<LogFlusher, TracingError> {
    tracing_log::LogTracer::init()?;

    let stdout_layer = fmt::layer().with_target(false);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|source| TracingError::LogDirectory {
                path: dir.display().to_string(),
                source,
            })?;

            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(format!("{app_name}.log"))
                .build(dir)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);

            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter())
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(LogFlusher { _guard: guard })
}

/// Installs a subscriber writing through the test harness, once per process.
///
/// Safe to call from every test.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        // Another subscriber may already be installed by the test binary itself.
        let _ = tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}
