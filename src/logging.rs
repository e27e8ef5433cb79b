//! Tracing initialization.
//!
//! One subscriber for the whole process: an EnvFilter derived from the
//! configured LogLevel (RUST_LOG is deliberately not consulted), a stdout
//! layer in compact or JSON format, and an optional non-blocking file layer.
//! File logging is refused when any ancestor of the log path is a symlink;
//! the daemon then keeps logging to stdout instead of failing.

use anyhow::Result;
use chrono::Local;
use std::fmt as stdfmt;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt as tsfmt;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LogLevel;
use crate::config::paths::path_has_symlink_ancestor;
use crate::output as out;
use crate::platform::open_log_file_secure_append;

/// Human-friendly timestamps (DD/MM/YY HH:MM:SS), local time.
struct LocalHumanTime;
impl FormatTime for LocalHumanTime {
    fn format_time(&self, w: &mut tsfmt::format::Writer<'_>) -> stdfmt::Result {
        write!(w, "{}", Local::now().format("%d/%m/%y %H:%M:%S"))
    }
}

fn filter_for(lvl: &LogLevel) -> EnvFilter {
    EnvFilter::new(match lvl {
        LogLevel::Quiet => "error",
        LogLevel::Normal => "info",
        LogLevel::Info => "debug",
        LogLevel::Debug => "trace",
    })
}

/// Open the log file behind a non-blocking writer, or explain why not.
/// Refusal is soft: stdout logging still comes up.
fn file_writer(path: &Path) -> Option<(NonBlocking, WorkerGuard)> {
    match path_has_symlink_ancestor(path) {
        Ok(false) => {}
        Ok(true) => {
            out::print_warn(&format!(
                "Refusing file logging: an ancestor of {} is a symlink. Logs continue to stdout.",
                path.display()
            ));
            return None;
        }
        Err(e) => {
            out::print_warn(&format!(
                "Cannot check {} for symlinked ancestors ({e}). Logs continue to stdout.",
                path.display()
            ));
            return None;
        }
    }
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match open_log_file_secure_append(path) {
        Ok(file) => Some(tracing_appender::non_blocking(file)),
        Err(e) => {
            out::print_warn(&format!(
                "Failed to open log file {}: {e}. Logs continue to stdout.",
                path.display()
            ));
            None
        }
    }
}

/// Initialize the global subscriber. The returned guard, when present, must
/// live until process exit so the file appender flushes.
pub fn init_tracing(
    lvl: &LogLevel,
    log_file: Option<&Path>,
    json: bool,
) -> Result<Option<WorkerGuard>> {
    let env_filter = filter_for(lvl);
    let file = log_file.and_then(file_writer);

    // The json/compact branches cannot share a variable (different layer
    // types), so each combination initializes the registry itself.
    match (json, file) {
        (true, Some((writer, guard))) => {
            registry()
                .with(env_filter)
                .with(json_layer().with_writer(std::io::stdout))
                .with(json_layer().with_writer(writer))
                .init();
            Ok(Some(guard))
        }
        (true, None) => {
            registry()
                .with(env_filter)
                .with(json_layer().with_writer(std::io::stdout))
                .init();
            Ok(None)
        }
        (false, Some((writer, guard))) => {
            registry()
                .with(env_filter)
                .with(compact_layer().with_writer(std::io::stdout))
                .with(compact_layer().with_writer(writer))
                .init();
            Ok(Some(guard))
        }
        (false, None) => {
            registry()
                .with(env_filter)
                .with(compact_layer().with_writer(std::io::stdout))
                .init();
            Ok(None)
        }
    }
}

fn json_layer<S>() -> tsfmt::Layer<
    S,
    tsfmt::format::JsonFields,
    tsfmt::format::Format<tsfmt::format::Json, LocalHumanTime>,
> {
    tsfmt::layer()
        .json()
        .with_timer(LocalHumanTime)
        .with_level(true)
        .with_target(true)
        .with_thread_ids(true)
}

fn compact_layer<S>() -> tsfmt::Layer<
    S,
    tsfmt::format::DefaultFields,
    tsfmt::format::Format<tsfmt::format::Compact, LocalHumanTime>,
> {
    tsfmt::layer()
        .with_timer(LocalHumanTime)
        .with_level(true)
        .with_target(true)
        .with_thread_ids(true)
        .compact()
}
