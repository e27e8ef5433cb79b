//! Download ledger: the persisted record of remote files already fetched.
//!
//! The in-memory map is the source of truth once loaded ("active"). A flush
//! rewrites the whole file and marks the state passive; the next read or
//! mutation lazily reloads ("depersists") first. Persist and depersist are
//! mutually exclusive under one internal lock so no partial write is ever
//! observed. If the configured file cannot be created the ledger degrades to
//! a pass-through "always download" mode rather than blocking sync.
//!
//! File format: UTF-8 text, one `server|relative/path` per line, no header.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{debug, warn};

/// Separator between server name and relative path. Server names containing
/// it are rejected at configuration validation.
pub const SEPARATOR: char = '|';

struct LedgerState {
    entries: HashMap<String, HashSet<String>>,
    /// In-memory map reflects the latest state; false after a flush.
    active: bool,
}

pub struct DownloadLedger {
    file: Option<PathBuf>,
    state: Mutex<LedgerState>,
}

impl DownloadLedger {
    /// Open (creating if needed) the ledger file. A file that cannot be
    /// created yields a pass-through ledger that always downloads.
    pub fn open(file: Option<PathBuf>) -> Self {
        let file = file.and_then(|path| {
            if let Some(parent) = path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            match fs::OpenOptions::new().create(true).append(true).open(&path) {
                Ok(_) => Some(path),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot create ledger file; operating in always-download mode");
                    None
                }
            }
        });
        Self {
            file,
            state: Mutex::new(LedgerState {
                entries: HashMap::new(),
                active: false,
            }),
        }
    }

    /// Whether the ledger is persistent or pass-through.
    pub fn is_persistent(&self) -> bool {
        self.file.is_some()
    }

    /// True when `path` on `server` has not been downloaded yet.
    pub fn should_download(&self, server: &str, path: &str) -> bool {
        let Some(_) = self.file else {
            return true;
        };
        let mut state = self.state.lock().unwrap();
        self.depersist_if_stale(&mut state);
        !state
            .entries
            .get(server)
            .is_some_and(|set| set.contains(path))
    }

    /// Record a completed download. Membership only grows during a session.
    pub fn mark_downloaded(&self, server: &str, path: &str) {
        if self.file.is_none() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        self.depersist_if_stale(&mut state);
        state
            .entries
            .entry(server.to_string())
            .or_default()
            .insert(path.to_string());
    }

    /// Rewrite the whole file from the in-memory map, then mark it passive so
    /// external edits are picked up on the next access.
    pub fn flush(&self) -> io::Result<()> {
        let Some(path) = &self.file else {
            return Ok(());
        };
        let mut state = self.state.lock().unwrap();
        self.depersist_if_stale(&mut state);
        let mut out = fs::File::create(path)?;
        let mut servers: Vec<&String> = state.entries.keys().collect();
        servers.sort();
        for server in servers {
            let mut paths: Vec<&String> = state.entries[server].iter().collect();
            paths.sort();
            for p in paths {
                writeln!(out, "{server}{SEPARATOR}{p}")?;
            }
        }
        out.sync_all()?;
        state.active = false;
        debug!(path = %path.display(), "ledger flushed");
        Ok(())
    }

    fn depersist_if_stale(&self, state: &mut LedgerState) {
        if state.active {
            return;
        }
        let Some(path) = &self.file else {
            return;
        };
        state.entries.clear();
        match fs::read_to_string(path) {
            Ok(content) => {
                for line in content.lines() {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match line.split_once(SEPARATOR) {
                        Some((server, p)) => {
                            state
                                .entries
                                .entry(server.to_string())
                                .or_default()
                                .insert(p.to_string());
                        }
                        None => {
                            warn!(line, "malformed ledger line skipped");
                        }
                    }
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ledger reload failed; starting empty");
            }
        }
        state.active = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn roundtrip_through_flush_and_fresh_load() {
        let td = tempdir().unwrap();
        let file = td.path().join("ledger.txt");

        let ledger = DownloadLedger::open(Some(file.clone()));
        assert!(ledger.should_download("alpha", "tv/show.mkv"));
        ledger.mark_downloaded("alpha", "tv/show.mkv");
        ledger.mark_downloaded("beta", "movies/m.mp4");
        assert!(!ledger.should_download("alpha", "tv/show.mkv"));
        ledger.flush().unwrap();

        let fresh = DownloadLedger::open(Some(file));
        assert!(!fresh.should_download("alpha", "tv/show.mkv"));
        assert!(!fresh.should_download("beta", "movies/m.mp4"));
        assert!(fresh.should_download("alpha", "tv/other.mkv"));
        assert!(fresh.should_download("gamma", "tv/show.mkv"));
    }

    #[test]
    fn flush_marks_passive_and_rereads_external_edits() {
        let td = tempdir().unwrap();
        let file = td.path().join("ledger.txt");

        let ledger = DownloadLedger::open(Some(file.clone()));
        ledger.mark_downloaded("s", "a");
        ledger.flush().unwrap();

        // External edit between flush and the next read.
        fs::write(&file, format!("s{SEPARATOR}a\ns{SEPARATOR}b\n")).unwrap();
        assert!(!ledger.should_download("s", "b"), "external edit observed");
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let td = tempdir().unwrap();
        let file = td.path().join("ledger.txt");
        fs::write(&file, "no-separator-here\ns|ok\n\n").unwrap();

        let ledger = DownloadLedger::open(Some(file));
        assert!(!ledger.should_download("s", "ok"));
        assert!(ledger.should_download("no-separator-here", "x"));
    }

    #[test]
    fn uncreatable_file_means_pass_through() {
        let td = tempdir().unwrap();
        // A path under an existing *file* cannot be created.
        let blocker = td.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();
        let ledger = DownloadLedger::open(Some(blocker.join("ledger.txt")));
        assert!(!ledger.is_persistent());
        ledger.mark_downloaded("s", "p");
        assert!(ledger.should_download("s", "p"), "always-download mode");
        ledger.flush().unwrap();
    }

    #[test]
    fn no_file_configured_is_pass_through() {
        let ledger = DownloadLedger::open(None);
        assert!(!ledger.is_persistent());
        assert!(ledger.should_download("s", "p"));
    }
}
