//! Subscriber setup: console output plus an optional daily-rolling log file.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use streamgate_core::config::DaemonConfig;

/// Install the global subscriber. `RUST_LOG` overrides `daemon.log_level`.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the process lifetime.
pub fn init(daemon: &DaemonConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&daemon.log_level)
            .with_context(|| format!("invalid daemon.log_level {:?}", daemon.log_level))?
            .add_directive("hyper=warn".parse()?)
            .add_directive("reqwest=warn".parse()?),
    };

    let (file_layer, guard) = match file_appender(daemon)? {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .context("logging already initialised")?;

    Ok(guard)
}

/// Daily-rotated appender for `daemon.log_file`, keeping
/// `daemon.log_backup_count` files. `None` when file logging is off.
fn file_appender(daemon: &DaemonConfig) -> anyhow::Result<Option<RollingFileAppender>> {
    let log_file = daemon.log_file.trim();
    if log_file.is_empty() {
        return Ok(None);
    }
    let path = Path::new(log_file);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("daemon.log_file {log_file:?} has no file name"))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(daemon.log_backup_count.max(1))
        .build(dir)
        .with_context(|| format!("cannot open log file {log_file}"))?;
    Ok(Some(appender))
}
