//! CLI definition and parsing.
//! Defines Args and provides parse() for command-line handling.
//!
//! Notes:
//! - CLI flags override values loaded from the XML config.
//! - --debug is a shorthand for --log-level debug.

use clap::{Parser, ValueHint};
use std::path::PathBuf;

use crate::config::{Config, LogLevel};

/// CLI wrapper for the sluice library.
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Watch directories, wait for files to settle, and move them by rule"
)]
pub struct Args {
    /// Path to the XML config file (overrides SLUICE_CONFIG and the default location).
    #[arg(
        short = 'c',
        long,
        value_name = "FILE",
        value_hint = ValueHint::FilePath,
        help = "Config file to load"
    )]
    pub config: Option<PathBuf>,

    /// Classify a path without touching it: print the matching rule and
    /// resolved destination, then exit.
    #[arg(
        long,
        value_name = "PATH",
        value_hint = ValueHint::AnyPath,
        help = "Show which rule would handle PATH and where it would go, then exit"
    )]
    pub preview: Option<PathBuf>,

    /// Run one stability sweep and dispatch drain instead of daemonizing.
    #[arg(long, help = "Process current arrivals once and exit")]
    pub once: bool,

    /// Enable debug logging (equivalent to `--log-level debug`).
    #[arg(
        short = 'd',
        long,
        help = "Enable debug logging (shorthand for --log-level debug)"
    )]
    pub debug: bool,

    /// Set log level. One of: quiet, normal, info, debug.
    #[arg(long, help = "Set log level: quiet, normal, info, debug")]
    pub log_level: Option<String>,

    /// Print where sluice will look for the config file (or SLUICE_CONFIG if set), then exit.
    #[arg(long, help = "Print the config file location used by sluice and exit")]
    pub print_config: bool,

    /// Emit logs in structured JSON (includes timestamp, level, and structured fields).
    #[arg(long, help = "Emit logs in structured JSON")]
    pub json: bool,
}

impl Args {
    /// Effective log level derived from flags.
    /// Precedence: --debug > --log-level value > None (use config default).
    pub fn effective_log_level(&self) -> Option<LogLevel> {
        if self.debug {
            return Some(LogLevel::Debug);
        }
        self.log_level.as_deref().and_then(LogLevel::parse)
    }

    /// Apply CLI overrides to a loaded Config (in-place). No-ops for unset flags.
    pub fn apply_overrides(&self, cfg: &mut Config) {
        if let Some(level) = self.effective_log_level() {
            cfg.log_level = level;
        }
    }
}

pub fn parse() -> Args {
    Args::parse()
}
