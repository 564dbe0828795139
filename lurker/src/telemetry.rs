use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_FILTER: &str = "info,lurker=debug";

/// Log to stdout and to a daily-rotating file under `directory`.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the file writer.
pub fn init(directory: &Path, file_prefix: &str, filter: Option<&str>) -> Result<WorkerGuard> {
    std::fs::create_dir_all(directory)
        .with_context(|| format!("creating log directory {}", directory.display()))?;

    let appender = tracing_appender::rolling::daily(directory, file_prefix);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(build_filter(filter)?)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(guard)
}

/// `RUST_LOG` first, then the configured directives, then the default.
pub fn build_filter(configured: Option<&str>) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(configured.unwrap_or(DEFAULT_FILTER))
            .with_context(|| format!("invalid log filter {:?}", configured.unwrap_or(DEFAULT_FILTER))),
    }
}
