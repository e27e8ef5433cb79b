//! Remote transfer collaborator boundary.
//!
//! Sync needs exactly three capabilities from a transfer implementation:
//! connect, list a remote directory, and fetch a file with optional progress
//! reporting. The protocol itself (SFTP, FTPS, ...) lives outside this crate;
//! tests use an in-memory implementation.

use anyhow::Result;
use std::path::{Path, PathBuf};

/// Connection settings for one remote server, as configured.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    /// Expected host key fingerprint; implementations should refuse on
    /// mismatch.
    pub host_fingerprint: Option<String>,
    /// Remote directories to list each cycle.
    pub dirs: Vec<String>,
    /// Optional prefix of the non-symlinked ("real") tree; a failed download
    /// is retried once with the path rebased onto it.
    pub real_prefix: Option<String>,
    /// Skip entries that do not match exactly one configured rule.
    pub rule_guard: bool,
}

/// Progress callback; receives the cumulative byte count and returns whether
/// the transfer should continue (false aborts mid-transfer, used by forced
/// shutdown).
pub type ProgressFn<'a> = &'a mut dyn FnMut(u64) -> bool;

/// An established session with one server.
pub trait RemoteSession {
    /// Entry names within `remote_dir` (no recursion, no dot entries).
    fn list(&mut self, remote_dir: &str) -> Result<Vec<String>>;

    /// Download `remote_path` into `local_dir`, reporting progress. Returns
    /// the local path written.
    fn get(&mut self, remote_path: &str, local_dir: &Path, progress: ProgressFn<'_>)
    -> Result<PathBuf>;
}

/// Factory for sessions; one implementation serves all configured servers.
pub trait RemoteTransfer: Send + Sync {
    fn connect(&self, server: &ServerConfig) -> Result<Box<dyn RemoteSession + '_>>;
}
