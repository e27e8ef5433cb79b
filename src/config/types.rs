//! Core configuration types.
//! - Config holds runtime settings with sensible defaults.
//! - LogLevel represents verbosity with simple parsing helpers.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::rules::RuleSet;
use crate::sync::ServerConfig;

use super::paths;

/// Program-defined verbosity levels exposed to users/config.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Only errors
    Quiet,
    /// Informational output (default)
    #[default]
    Normal,
    /// More info (like verbose)
    Info,
    /// Debug/trace
    Debug,
}

impl LogLevel {
    /// Parse common string names into our LogLevel (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "quiet" | "error" | "none" => Some(LogLevel::Quiet),
            "normal" => Some(LogLevel::Normal),
            "info" | "verbose" | "detailed" => Some(LogLevel::Info),
            "debug" | "trace" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Quiet => "quiet",
            LogLevel::Normal => "normal",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid log level: '{s}'"))
    }
}

/// Default poll cadence of the stability loop.
pub const POLL_INTERVAL_DEFAULT: Duration = Duration::from_secs(10);
/// Minimum time a file must be quiet before it can be dispatched.
pub const QUIET_WINDOW_DEFAULT: Duration = Duration::from_secs(60);
/// Default cadence of the remote sync loop.
pub const SYNC_INTERVAL_DEFAULT: Duration = Duration::from_secs(15 * 60);
/// Default headroom a staging directory must offer (1 GiB).
pub const MIN_FREE_BYTES_DEFAULT: u64 = 1024 * 1024 * 1024;

/// Runtime configuration for the whole pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directories watched for new arrivals.
    pub watch_dirs: Vec<PathBuf>,
    /// Stability poll cadence.
    pub poll_interval: Duration,
    /// Quiet window a file must survive unchanged before dispatch.
    pub quiet_window: Duration,
    /// Delete an existing destination before moving instead of failing.
    pub delete_duplicates: bool,
    /// Mode applied to files when an operator wants permissions set.
    pub file_mode: Option<u32>,
    /// Mode applied to directories created under destinations.
    pub dir_mode: Option<u32>,
    /// Forbid simultaneous sync and move-dispatch activity.
    pub exclusive_sync: bool,
    /// Console verbosity.
    pub log_level: LogLevel,
    /// Optional path to a log file.
    pub log_file: Option<PathBuf>,
    /// Compiled classification rules.
    pub rules: RuleSet,
    /// Remote servers to sync from.
    pub servers: Vec<ServerConfig>,
    /// Priority-ordered staging directories for downloads.
    pub staging_dirs: Vec<PathBuf>,
    /// Minimum free bytes a staging directory must offer.
    pub min_free_bytes: u64,
    /// Sync loop cadence.
    pub sync_interval: Duration,
    /// Ledger file; None disables dedupe persistence (always download).
    pub ledger_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watch_dirs: Vec::new(),
            poll_interval: POLL_INTERVAL_DEFAULT,
            quiet_window: QUIET_WINDOW_DEFAULT,
            delete_duplicates: false,
            file_mode: None,
            dir_mode: None,
            exclusive_sync: false,
            log_level: LogLevel::Normal,
            log_file: paths::default_log_path().ok(),
            rules: RuleSet::default(),
            servers: Vec::new(),
            staging_dirs: Vec::new(),
            min_free_bytes: MIN_FREE_BYTES_DEFAULT,
            sync_interval: SYNC_INTERVAL_DEFAULT,
            ledger_file: None,
        }
    }
}
