// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{Config, LoggingLevel};

const LOG_PREFIX: &str = "volumed.log";

fn env_filter(level: LoggingLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = level.as_directive();
        EnvFilter::new(format!(
            "warn,volumed={directive},volume_service={directive},volume_core={directive}"
        ))
    })
}

/// Install the global subscriber. Logs go to stderr so stdout stays JSON.
///
/// The returned guard flushes the file writer and must live until exit.
pub fn init(config: &Config) -> Option<WorkerGuard> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let Some(dir) = config.log_dir.as_deref() else {
        tracing_subscriber::registry()
            .with(env_filter(config.log_level))
            .with(stderr_layer)
            .init();
        return None;
    };

    match file_writer(dir) {
        Ok((writer, guard)) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false);

            tracing_subscriber::registry()
                .with(env_filter(config.log_level))
                .with(stderr_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        Err(e) => {
            eprintln!("volumed: failed to initialize file logging: {e:#}");
            tracing_subscriber::registry()
                .with(env_filter(config.log_level))
                .with(stderr_layer)
                .init();
            None
        }
    }
}

fn file_writer(
    dir: &Path,
) -> anyhow::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    if let Err(e) = fs::create_dir_all(dir) {
        anyhow::bail!("create log directory failed: {} ({e})", dir.display());
    }

    let appender = tracing_appender::rolling::daily(dir, LOG_PREFIX);
    Ok(tracing_appender::non_blocking(appender))
}
