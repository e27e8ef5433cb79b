//! Filesystem watching.
//!
//! Wraps a `notify` recursive watcher over the configured watch directories.
//! The tracked unit is the *top-level entry* of a watch directory: an event
//! anywhere under `watch/foo/...` submits `watch/foo` to the stability
//! tracker, which owns quiescence from there. Existing entries are submitted
//! once at startup so files that arrived while the daemon was down are not
//! missed.

use anyhow::{Context, Result, bail};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher, recommended_watcher};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::stability::StabilityTracker;

pub struct DirectoryWatcher {
    // Held only to keep the watcher alive; dropping it stops event delivery.
    _watcher: RecommendedWatcher,
}

impl DirectoryWatcher {
    /// Scan `roots` for existing entries, then watch them for new arrivals.
    pub fn start(roots: Vec<PathBuf>, tracker: Arc<StabilityTracker>) -> Result<Self> {
        if roots.is_empty() {
            bail!("no watch directories configured");
        }
        for root in &roots {
            scan_existing(root, &tracker)?;
        }

        let event_roots = roots.clone();
        let event_tracker = Arc::clone(&tracker);
        let mut watcher = recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => handle_event(&event, &event_roots, &event_tracker),
                Err(e) => warn!(error = %e, "watch event stream error"),
            }
        })
        .context("failed to create filesystem watcher")?;

        for root in &roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .with_context(|| format!("failed to watch {}", root.display()))?;
            info!(path = %root.display(), "watching directory");
        }
        Ok(Self { _watcher: watcher })
    }
}

fn scan_existing(root: &Path, tracker: &StabilityTracker) -> Result<()> {
    let entries = fs::read_dir(root)
        .with_context(|| format!("cannot enumerate {}", root.display()))?;
    for entry in entries.filter_map(Result::ok) {
        debug!(path = %entry.path().display(), "pre-existing entry");
        tracker.submit(entry.path());
    }
    Ok(())
}

fn handle_event(event: &Event, roots: &[PathBuf], tracker: &StabilityTracker) {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return;
    }
    for path in &event.paths {
        if let Some(entry) = top_level_entry(roots, path) {
            tracker.submit(entry);
        }
    }
}

/// Map an event path to the top-level entry of its watch root, if any.
fn top_level_entry(roots: &[PathBuf], path: &Path) -> Option<PathBuf> {
    for root in roots {
        if let Ok(rel) = path.strip_prefix(root) {
            let first = rel.components().next()?;
            return Some(root.join(first.as_os_str()));
        }
    }
    None
}
