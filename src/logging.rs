//! Tracing subscriber setup shared by the CLI and embedding applications.

use crate::config::LoggingConfig;
use std::env;
use std::sync::OnceLock;

static TRACE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Install a global `tracing` subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over `logging.level`; `BAKERY_LOG_JSON`
/// takes precedence over `logging.format`. Calling this more than once is a
/// no-op for the subscriber.
pub fn init_tracing(logging_config: &LoggingConfig) {
    let json = env::var("BAKERY_LOG_JSON")
        .ok()
        .map_or_else(|| logging_config.format == "json", |v| v != "0");

    let level = env::var("RUST_LOG")
        .ok()
        .unwrap_or_else(|| logging_config.level.clone());

    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());
    if TRACE_GUARD.set(guard).is_err() {
        return;
    }

    let filter = || {
        tracing_subscriber::EnvFilter::try_new(&level)
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if json {
        Box::new(
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter())
                .with_thread_names(true)
                .with_writer(non_blocking)
                .finish(),
        )
    } else {
        Box::new(
            tracing_subscriber::fmt()
                .compact()
                .with_env_filter(filter())
                .with_ansi(false)
                .with_thread_names(true)
                .with_writer(non_blocking)
                .finish(),
        )
    };

    let _ = tracing::subscriber::set_global_default(subscriber);
}
