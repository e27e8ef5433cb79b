//! Per-path stability state machine.
//!
//! `submit` registers a candidate; a background loop polls every candidate on
//! a fixed interval. A leaf is ready when size and mtime are unchanged from
//! the previous poll, at least the quiet window has elapsed since the last
//! observed change, and the writer probe succeeds. A directory is ready only
//! when every current and newly-discovered descendant is independently ready;
//! children are re-enumerated on every poll because a directory may still be
//! receiving files. Paths that disappear before readiness are dropped with a
//! warning, not an error.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::events::{AuditEvent, SharedSink};
use crate::shutdown;

use super::probe::StabilityProbe;

/// Called with each path that became ready; the tracker has already dropped
/// the path from tracking when this runs.
pub type ReadyFn = Box<dyn Fn(PathBuf) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Observation {
    size: u64,
    mtime: SystemTime,
}

fn observe(path: &Path) -> std::io::Result<Observation> {
    let meta = fs::metadata(path)?;
    Ok(Observation {
        size: meta.len(),
        mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
    })
}

/// Poll state of one leaf file.
#[derive(Debug)]
struct LeafState {
    last: Observation,
    last_change: Instant,
    /// Set once a poll has seen the same observation twice in a row.
    unchanged_once: bool,
}

impl LeafState {
    fn new(obs: Observation) -> Self {
        Self {
            last: obs,
            last_change: Instant::now(),
            unchanged_once: false,
        }
    }
}

/// One submitted candidate: a leaf file, or a directory tree whose leaves are
/// tracked independently.
struct WatchedEntry {
    is_dir: bool,
    leaf: Option<LeafState>,
    children: BTreeMap<PathBuf, LeafState>,
}

struct TrackerState {
    entries: BTreeMap<PathBuf, WatchedEntry>,
    suppressed: HashSet<PathBuf>,
}

pub struct StabilityTracker {
    state: Mutex<TrackerState>,
    probe: Box<dyn StabilityProbe>,
    quiet_window: Duration,
    poll_interval: Duration,
    on_ready: ReadyFn,
    sink: SharedSink,
    stop: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StabilityTracker {
    pub fn new(
        probe: Box<dyn StabilityProbe>,
        poll_interval: Duration,
        quiet_window: Duration,
        sink: SharedSink,
        on_ready: ReadyFn,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TrackerState {
                entries: BTreeMap::new(),
                suppressed: HashSet::new(),
            }),
            probe,
            quiet_window,
            poll_interval,
            on_ready,
            sink,
            stop: AtomicBool::new(false),
            handle: Mutex::new(None),
        })
    }

    /// Spawn the background poll loop.
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("sluice-stability".into())
            .spawn(move || this.poll_loop())
            .expect("failed to spawn stability poll loop");
        *self.handle.lock().unwrap() = Some(handle);
    }

    /// Register a candidate path. Suppressed paths (rename-probe artifacts)
    /// are ignored once.
    pub fn submit(&self, path: PathBuf) {
        let mut state = self.state.lock().unwrap();
        if state.suppressed.remove(&path) {
            debug!(path = %path.display(), "suppressed re-submission after rename probe");
            return;
        }
        if state.entries.contains_key(&path) {
            return;
        }
        let is_dir = path.is_dir();
        if !is_dir && !path.is_file() {
            warn!(path = %path.display(), "submitted path no longer exists; ignored");
            return;
        }
        let leaf = if is_dir {
            None
        } else {
            match observe(&path) {
                Ok(obs) => Some(LeafState::new(obs)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot stat candidate; ignored");
                    return;
                }
            }
        };
        debug!(path = %path.display(), is_dir, "candidate registered");
        self.sink.record(&AuditEvent::Seen { path: path.clone() });
        state.entries.insert(
            path,
            WatchedEntry {
                is_dir,
                leaf,
                children: BTreeMap::new(),
            },
        );
    }

    /// Number of candidates currently tracked.
    pub fn tracked(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    /// Stop the poll loop and join it.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn poll_loop(&self) {
        info!(interval_s = self.poll_interval.as_secs(), quiet_s = self.quiet_window.as_secs(), "stability poll loop started");
        while !self.stop.load(Ordering::Relaxed) && !shutdown::is_requested() {
            // Sleep in short slices so stop requests are observed promptly.
            let deadline = Instant::now() + self.poll_interval;
            while Instant::now() < deadline {
                if self.stop.load(Ordering::Relaxed) || shutdown::is_requested() {
                    return;
                }
                std::thread::sleep(Duration::from_millis(200).min(self.poll_interval));
            }
            self.poll_once();
        }
        debug!("stability poll loop exiting");
    }

    /// One full poll over all candidates. Public so one-shot mode and tests
    /// can drive the state machine deterministically.
    pub fn poll_once(&self) {
        let ready = {
            let mut state = self.state.lock().unwrap();
            let mut ready: Vec<PathBuf> = Vec::new();
            let mut gone: Vec<PathBuf> = Vec::new();

            let paths: Vec<PathBuf> = state.entries.keys().cloned().collect();
            for path in paths {
                let entry = state.entries.get_mut(&path).expect("entry present");
                if !path.exists() {
                    warn!(path = %path.display(), "candidate disappeared before readiness; dropping");
                    gone.push(path.clone());
                    continue;
                }
                let is_ready = if entry.is_dir {
                    self.poll_dir(&path, entry)
                } else {
                    self.poll_leaf_entry(&path, entry)
                };
                if is_ready {
                    ready.push(path.clone());
                }
            }
            for p in gone {
                state.entries.remove(&p);
            }
            for p in &ready {
                state.entries.remove(p);
            }
            // Absorb any rename-probe artifacts into the suppression set so
            // the watcher's next report of these paths is ignored.
            while let Some(p) = self.probe.take_suppressed() {
                state.suppressed.insert(p);
            }
            ready
        };
        for path in ready {
            info!(path = %path.display(), "path is stable; dispatching");
            (self.on_ready)(path);
        }
    }

    fn poll_leaf_entry(&self, path: &Path, entry: &mut WatchedEntry) -> bool {
        let leaf = match entry.leaf.as_mut() {
            Some(l) => l,
            None => return false,
        };
        self.poll_leaf(path, leaf)
    }

    /// Advance one leaf's state; true when it is ready.
    fn poll_leaf(&self, path: &Path, leaf: &mut LeafState) -> bool {
        let obs = match observe(path) {
            Ok(o) => o,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "leaf stat failed this poll");
                return false;
            }
        };
        if obs != leaf.last {
            leaf.last = obs;
            leaf.last_change = Instant::now();
            leaf.unchanged_once = false;
            return false;
        }
        leaf.unchanged_once = true;
        if leaf.last_change.elapsed() < self.quiet_window {
            return false;
        }
        match self.probe.probe(path) {
            Ok(free) => {
                if !free {
                    debug!(path = %path.display(), "probe says file still held; retrying next poll");
                }
                free
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "probe failed; retrying next poll");
                false
            }
        }
    }

    /// Re-enumerate a directory's files, merge into the tracked set, and
    /// report readiness only when every child is ready.
    fn poll_dir(&self, dir: &Path, entry: &mut WatchedEntry) -> bool {
        let mut current: HashSet<PathBuf> = HashSet::new();
        let mut fresh: HashSet<PathBuf> = HashSet::new();
        for file in WalkDir::new(dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let p = file.into_path();
            current.insert(p.clone());
            if !entry.children.contains_key(&p) {
                if let Ok(obs) = observe(&p) {
                    debug!(path = %p.display(), "new descendant discovered");
                    fresh.insert(p.clone());
                    entry.children.insert(p, LeafState::new(obs));
                }
            }
        }
        // Forget children deleted out from under us.
        entry.children.retain(|p, _| current.contains(p));

        if entry.children.is_empty() {
            // An empty directory has nothing settling; not ready until it has
            // content (empty trees are not worth moving).
            return false;
        }
        // A freshly discovered child counts as its own first observation; it
        // is not polled until the next round.
        let mut all_ready = fresh.is_empty();
        let children: Vec<PathBuf> = entry.children.keys().cloned().collect();
        for child in children {
            if fresh.contains(&child) {
                continue;
            }
            let leaf = entry.children.get_mut(&child).expect("child present");
            if !self.poll_leaf(&child, leaf) {
                all_ready = false;
            }
        }
        all_ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TracingSink;
    use crate::stability::probe::ExclusiveOpenProbe;
    use std::sync::mpsc;

    fn tracker_with_channel(
        quiet: Duration,
    ) -> (Arc<StabilityTracker>, mpsc::Receiver<PathBuf>) {
        let (tx, rx) = mpsc::channel();
        let tracker = StabilityTracker::new(
            Box::new(ExclusiveOpenProbe),
            Duration::from_millis(10),
            quiet,
            Arc::new(TracingSink),
            Box::new(move |p| {
                let _ = tx.send(p);
            }),
        );
        (tracker, rx)
    }

    #[test]
    fn unchanged_file_becomes_ready_exactly_once() {
        let td = tempfile::tempdir().unwrap();
        let f = td.path().join("done.bin");
        fs::write(&f, b"payload").unwrap();

        let (tracker, rx) = tracker_with_channel(Duration::ZERO);
        tracker.submit(f.clone());
        assert_eq!(tracker.tracked(), 1);

        tracker.poll_once();
        assert_eq!(rx.try_recv().unwrap(), f);
        assert_eq!(tracker.tracked(), 0, "dispatched path dropped");
        tracker.poll_once();
        assert!(rx.try_recv().is_err(), "ready fires exactly once");
    }

    #[test]
    fn growing_file_stays_not_ready() {
        let td = tempfile::tempdir().unwrap();
        let f = td.path().join("grow.bin");
        fs::write(&f, b"1").unwrap();

        let (tracker, rx) = tracker_with_channel(Duration::ZERO);
        tracker.submit(f.clone());
        fs::write(&f, b"12").unwrap();
        tracker.poll_once();
        assert!(rx.try_recv().is_err(), "size changed between polls");
        assert_eq!(tracker.tracked(), 1);

        tracker.poll_once();
        assert_eq!(rx.try_recv().unwrap(), f, "stable after quiescing");
    }

    #[test]
    fn quiet_window_delays_readiness() {
        let td = tempfile::tempdir().unwrap();
        let f = td.path().join("slow.bin");
        fs::write(&f, b"x").unwrap();

        let (tracker, rx) = tracker_with_channel(Duration::from_millis(80));
        tracker.submit(f.clone());
        tracker.poll_once();
        assert!(rx.try_recv().is_err(), "quiet window not yet elapsed");
        std::thread::sleep(Duration::from_millis(100));
        tracker.poll_once();
        assert_eq!(rx.try_recv().unwrap(), f);
    }

    #[test]
    fn disappeared_candidate_is_dropped_silently() {
        let td = tempfile::tempdir().unwrap();
        let f = td.path().join("gone.bin");
        fs::write(&f, b"x").unwrap();

        let (tracker, rx) = tracker_with_channel(Duration::ZERO);
        tracker.submit(f.clone());
        fs::remove_file(&f).unwrap();
        tracker.poll_once();
        assert!(rx.try_recv().is_err());
        assert_eq!(tracker.tracked(), 0);
    }

    #[test]
    fn directory_waits_for_all_descendants() {
        let td = tempfile::tempdir().unwrap();
        let dir = td.path().join("batch");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("a.bin"), b"a").unwrap();

        let (tracker, rx) = tracker_with_channel(Duration::ZERO);
        tracker.submit(dir.clone());

        // New child appears between polls: merged, directory not yet ready.
        fs::write(dir.join("b.bin"), b"b").unwrap();
        tracker.poll_once();
        assert!(rx.try_recv().is_err(), "new descendant resets readiness");

        tracker.poll_once();
        assert_eq!(rx.try_recv().unwrap(), dir);
    }

    #[test]
    fn empty_directory_is_not_ready() {
        let td = tempfile::tempdir().unwrap();
        let dir = td.path().join("empty");
        fs::create_dir(&dir).unwrap();

        let (tracker, rx) = tracker_with_channel(Duration::ZERO);
        tracker.submit(dir.clone());
        tracker.poll_once();
        tracker.poll_once();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn suppressed_path_is_ignored_once() {
        let td = tempfile::tempdir().unwrap();
        let f = td.path().join("f.bin");
        fs::write(&f, b"x").unwrap();

        let (tracker, _rx) = tracker_with_channel(Duration::ZERO);
        tracker.state.lock().unwrap().suppressed.insert(f.clone());
        tracker.submit(f.clone());
        assert_eq!(tracker.tracked(), 0, "first submit suppressed");
        tracker.submit(f.clone());
        assert_eq!(tracker.tracked(), 1, "suppression consumed");
    }
}
