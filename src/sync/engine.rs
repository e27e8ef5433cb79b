//! Remote sync engine.
//!
//! A periodic loop that, per configured server: lists remote directories,
//! filters entries already in the ledger, optionally applies the
//! exactly-one-rule guard, picks a staging directory with enough free space,
//! and downloads what remains. Each downloaded file updates the ledger, gets
//! configured permissions applied, and is handed into the stability tracker
//! as a newly-arrived local file.
//!
//! An optional global lock sequences whole sync cycles against move
//! dispatch; it is held for the cycle, never across a network call inside
//! the ledger, and never by the dispatch worker across its queue.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::errors::SluiceError;
use crate::events::{AuditEvent, SharedSink};
use crate::platform;
use crate::rules::RuleSet;
use crate::shutdown;
use crate::stability::StabilityTracker;

use super::ledger::DownloadLedger;
use super::transfer::{RemoteSession, RemoteTransfer, ServerConfig};

/// Everything the engine needs, passed explicitly at construction.
pub struct SyncDeps {
    pub transfer: Arc<dyn RemoteTransfer>,
    pub ledger: Arc<DownloadLedger>,
    pub rules: Arc<RuleSet>,
    pub tracker: Arc<StabilityTracker>,
    pub sink: SharedSink,
    /// Priority-ordered staging directories; first with headroom wins.
    pub staging_dirs: Vec<PathBuf>,
    /// Minimum free bytes a staging directory must offer.
    pub min_free_bytes: u64,
    pub servers: Vec<ServerConfig>,
    pub interval: Duration,
    pub file_mode: Option<u32>,
    /// Present when configuration forbids simultaneous sync and dispatch.
    pub sync_lock: Option<Arc<Mutex<()>>>,
}

pub struct SyncEngine {
    deps: SyncDeps,
    stop: AtomicBool,
    force: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn new(deps: SyncDeps) -> Arc<Self> {
        Arc::new(Self {
            deps,
            stop: AtomicBool::new(false),
            force: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        })
    }

    /// Spawn the periodic sync loop.
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("sluice-sync".into())
            .spawn(move || this.sync_loop())
            .expect("failed to spawn sync loop");
        *self.handle.lock().unwrap() = Some(handle);
    }

    /// Stop after the in-flight batch; `force` also interrupts the current
    /// transfer through its progress callback.
    pub fn stop(&self, force: bool) {
        self.stop.store(true, Ordering::Relaxed);
        if force {
            self.force.store(true, Ordering::Relaxed);
        }
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Relaxed) || shutdown::is_requested()
    }

    fn sync_loop(&self) {
        info!(interval_s = self.deps.interval.as_secs(), servers = self.deps.servers.len(), "sync loop started");
        loop {
            self.run_cycle();
            let deadline = Instant::now() + self.deps.interval;
            while Instant::now() < deadline {
                if self.stopping() {
                    debug!("sync loop exiting");
                    return;
                }
                std::thread::sleep(Duration::from_millis(200).min(self.deps.interval));
            }
        }
    }

    /// One full cycle over all servers. Public so one-shot mode and tests can
    /// drive it directly.
    pub fn run_cycle(&self) {
        let _cycle = self.deps.sync_lock.as_ref().map(|l| l.lock().unwrap());
        for server in &self.deps.servers {
            if self.stopping() {
                return;
            }
            if let Err(e) = self.sync_server(server) {
                let code = e
                    .downcast_ref::<SluiceError>()
                    .map(SluiceError::code)
                    .unwrap_or("sync_error");
                warn!(code, server = %server.name, error = %e, "sync cycle failed for server; retrying next cycle");
                self.deps.sink.record(&AuditEvent::Error {
                    scope: "sync",
                    path: None,
                    detail: format!("server '{}': {e}", server.name),
                });
            }
        }
    }

    fn sync_server(&self, server: &ServerConfig) -> Result<()> {
        let mut session = self
            .deps
            .transfer
            .connect(server)
            .with_context(|| format!("connect to '{}'", server.name))?;

        let mut wanted: Vec<String> = Vec::new();
        for dir in &server.dirs {
            let names = session
                .list(dir)
                .with_context(|| format!("list '{dir}' on '{}'", server.name))?;
            for name in names {
                let remote_path = join_remote(dir, &name);
                if !self.deps.ledger.should_download(&server.name, &remote_path) {
                    continue;
                }
                if server.rule_guard && !self.passes_rule_guard(&name, server) {
                    continue;
                }
                wanted.push(remote_path);
            }
        }
        if wanted.is_empty() {
            debug!(server = %server.name, "nothing new to download");
            return Ok(());
        }

        let staging = self.pick_staging_dir(server)?;
        info!(server = %server.name, count = wanted.len(), staging = %staging.display(), "downloading batch");

        for remote_path in wanted {
            if self.stopping() {
                return Ok(());
            }
            match self.download_one(session.as_mut(), server, &remote_path, &staging) {
                Ok(local) => {
                    self.deps.ledger.mark_downloaded(&server.name, &remote_path);
                    if let Some(mode) = self.deps.file_mode {
                        if let Err(e) = platform::apply_modes_recursive(&local, Some(mode), None) {
                            warn!(path = %local.display(), error = %e, "could not apply mode to download");
                        }
                    }
                    self.deps.sink.record(&AuditEvent::Downloaded {
                        server: server.name.clone(),
                        remote_path: remote_path.clone(),
                        local: local.clone(),
                    });
                    self.deps.tracker.submit(local);
                }
                Err(e) => {
                    warn!(server = %server.name, remote = %remote_path, error = %e, "download failed; continuing with next entry");
                    self.deps.sink.record(&AuditEvent::Error {
                        scope: "download",
                        path: None,
                        detail: format!("{}: {e}", remote_path),
                    });
                }
            }
        }
        Ok(())
    }

    /// Fetch one entry, retrying on the configured "real" path when the
    /// primary (possibly symlinked) path fails.
    fn download_one(
        &self,
        session: &mut dyn RemoteSession,
        server: &ServerConfig,
        remote_path: &str,
        staging: &PathBuf,
    ) -> Result<PathBuf> {
        let force = Arc::clone(&self.force);
        let mut progress = move |_bytes: u64| !force.load(Ordering::Relaxed);

        match session.get(remote_path, staging, &mut progress) {
            Ok(local) => Ok(local),
            Err(primary_err) => {
                // An abort we caused ourselves is not worth a retry.
                if self.force.load(Ordering::Relaxed) {
                    return Err(SluiceError::Interrupted.into());
                }
                if let Some(prefix) = &server.real_prefix {
                    let name = remote_path.rsplit('/').next().unwrap_or(remote_path);
                    let real = join_remote(prefix, name);
                    debug!(remote = %remote_path, real = %real, "primary path failed; retrying real path");
                    let mut progress =
                        move |_bytes: u64| !self.force.load(Ordering::Relaxed);
                    session
                        .get(&real, staging, &mut progress)
                        .with_context(|| format!("both '{remote_path}' and '{real}' failed"))
                } else {
                    Err(primary_err)
                }
            }
        }
    }

    /// Entries matching zero or several rules are skipped, symmetric with the
    /// move-side ambiguity guard.
    fn passes_rule_guard(&self, name: &str, server: &ServerConfig) -> bool {
        let probe = std::path::Path::new(name);
        let hits = self
            .deps
            .rules
            .matching(probe)
            .len();
        if hits != 1 {
            debug!(server = %server.name, name, hits, "rule guard rejected remote entry");
            self.deps.sink.record(&AuditEvent::Error {
                scope: "sync_rule_guard",
                path: Some(probe.to_path_buf()),
                detail: format!("{hits} rules matched"),
            });
            return false;
        }
        true
    }

    /// First staging directory with enough free space wins.
    fn pick_staging_dir(&self, server: &ServerConfig) -> Result<PathBuf> {
        for dir in &self.deps.staging_dirs {
            match platform::free_space(dir) {
                Ok(avail) if avail >= self.deps.min_free_bytes => {
                    return Ok(dir.clone());
                }
                Ok(avail) => {
                    debug!(dir = %dir.display(), avail, needed = self.deps.min_free_bytes, "staging dir too full");
                }
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "cannot stat staging dir");
                }
            }
        }
        Err(SluiceError::NoStagingSpace {
            server: server.name.clone(),
        }
        .into())
    }
}

fn join_remote(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}
