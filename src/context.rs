//! Application context: ownership and lifecycle of every running component.
//!
//! `build` wires the pipeline from a validated `Config`; `teardown` stops
//! components in dependency order (producers before consumers) and then
//! verifies the component registry drained. A non-empty registry after
//! teardown means a stop path was skipped, which is reported as a hard error
//! rather than silently leaking a thread.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{info, warn};

use crate::config::Config;
use crate::dispatch::{DispatchSettings, Dispatcher, ShutdownMode};
use crate::events::{SharedSink, TracingSink};
use crate::route::Router;
use crate::stability::{StabilityTracker, default_probe};
use crate::sync::{DownloadLedger, RemoteTransfer, SyncDeps, SyncEngine};
use crate::watch::DirectoryWatcher;

/// Cadence of the background ledger flush.
const LEDGER_FLUSH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Names of components that have been started and not yet stopped.
#[derive(Default)]
pub struct ComponentRegistry {
    live: Mutex<BTreeSet<&'static str>>,
}

impl ComponentRegistry {
    pub fn register(&self, name: &'static str) {
        self.live.lock().unwrap().insert(name);
    }

    pub fn deregister(&self, name: &'static str) {
        self.live.lock().unwrap().remove(name);
    }

    pub fn remaining(&self) -> Vec<String> {
        self.live
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
}

pub struct AppContext {
    pub config: Config,
    pub sink: SharedSink,
    pub ledger: Arc<DownloadLedger>,
    pub tracker: Arc<StabilityTracker>,
    pub dispatcher: Arc<Dispatcher>,
    pub sync: Option<Arc<SyncEngine>>,
    registry: Arc<ComponentRegistry>,
    watcher: Option<DirectoryWatcher>,
    flush_stop: Arc<AtomicBool>,
    flush_handle: Option<JoinHandle<()>>,
}

impl AppContext {
    /// Wire and start every component the config calls for. `transfer` is the
    /// remote protocol backend; without one, configured servers are inert.
    pub fn build(config: Config, transfer: Option<Arc<dyn RemoteTransfer>>) -> Result<Self> {
        let sink: SharedSink = Arc::new(TracingSink);
        let registry = Arc::new(ComponentRegistry::default());
        let sync_lock = config
            .exclusive_sync
            .then(|| Arc::new(Mutex::new(())));

        let dispatcher = Dispatcher::start(
            DispatchSettings {
                delete_duplicates: config.delete_duplicates,
                file_mode: config.file_mode,
                dir_mode: config.dir_mode,
            },
            Arc::clone(&sink),
            sync_lock.clone(),
        );
        registry.register("dispatcher");

        let router = Router::new(
            config.rules.clone(),
            Arc::clone(&dispatcher),
            Arc::clone(&sink),
        );
        let tracker = StabilityTracker::new(
            default_probe(),
            config.poll_interval,
            config.quiet_window,
            Arc::clone(&sink),
            Box::new(move |path| router.route(path)),
        );
        tracker.start();
        registry.register("stability");

        let watcher = if config.watch_dirs.is_empty() {
            None
        } else {
            let w = DirectoryWatcher::start(config.watch_dirs.clone(), Arc::clone(&tracker))?;
            registry.register("watcher");
            Some(w)
        };

        let ledger = Arc::new(DownloadLedger::open(config.ledger_file.clone()));
        let flush_stop = Arc::new(AtomicBool::new(false));
        let flush_handle = if ledger.is_persistent() {
            registry.register("ledger_flush");
            Some(spawn_flush_loop(Arc::clone(&ledger), Arc::clone(&flush_stop)))
        } else {
            None
        };

        let sync = match (&transfer, config.servers.is_empty()) {
            (Some(transfer), false) => {
                let engine = SyncEngine::new(SyncDeps {
                    transfer: Arc::clone(transfer),
                    ledger: Arc::clone(&ledger),
                    rules: Arc::new(config.rules.clone()),
                    tracker: Arc::clone(&tracker),
                    sink: Arc::clone(&sink),
                    staging_dirs: config.staging_dirs.clone(),
                    min_free_bytes: config.min_free_bytes,
                    servers: config.servers.clone(),
                    interval: config.sync_interval,
                    file_mode: config.file_mode,
                    sync_lock,
                });
                engine.start();
                registry.register("sync");
                Some(engine)
            }
            (None, false) => {
                warn!("servers configured but no transfer backend available; sync disabled");
                None
            }
            _ => None,
        };

        Ok(Self {
            config,
            sink,
            ledger,
            tracker,
            dispatcher,
            sync,
            registry,
            watcher,
            flush_stop,
            flush_handle,
        })
    }

    /// Paths currently held by the stability tracker, for status output.
    pub fn tracked_paths(&self) -> usize {
        self.tracker.tracked()
    }

    /// Stop everything in dependency order and verify nothing is left
    /// running. `Discard` also interrupts in-flight transfers.
    pub fn teardown(mut self, mode: ShutdownMode) -> Result<()> {
        info!(?mode, "tearing down");
        if let Some(sync) = self.sync.take() {
            sync.stop(mode == ShutdownMode::Discard);
            self.registry.deregister("sync");
        }
        if self.watcher.take().is_some() {
            // Dropping the watcher stops event delivery.
            self.registry.deregister("watcher");
        }
        self.tracker.stop();
        self.registry.deregister("stability");
        self.dispatcher.shutdown(mode);
        self.registry.deregister("dispatcher");

        self.flush_stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.flush_handle.take() {
            let _ = handle.join();
            self.registry.deregister("ledger_flush");
        }
        if let Err(e) = self.ledger.flush() {
            warn!(error = %e, "final ledger flush failed");
        }

        let remaining = self.registry.remaining();
        if !remaining.is_empty() {
            return Err(crate::errors::SluiceError::TeardownIncomplete { remaining }.into());
        }
        info!("teardown complete");
        Ok(())
    }
}

fn spawn_flush_loop(ledger: Arc<DownloadLedger>, stop: Arc<AtomicBool>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("sluice-ledger-flush".into())
        .spawn(move || {
            loop {
                let deadline = Instant::now() + LEDGER_FLUSH_INTERVAL;
                while Instant::now() < deadline {
                    if stop.load(Ordering::Relaxed) || crate::shutdown::is_requested() {
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(200));
                }
                if let Err(e) = ledger.flush() {
                    warn!(error = %e, "periodic ledger flush failed");
                }
            }
        })
        .expect("failed to spawn ledger flush loop")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::OperatorSpec;
    use crate::rules::{Rule, RuleSet, RuleSpec};
    use tempfile::tempdir;

    fn minimal_config(td: &std::path::Path) -> Config {
        let rule = Rule::compile(RuleSpec {
            name: "all".into(),
            target: td.join("out").to_string_lossy().into_owned(),
            operator: OperatorSpec::builtin("move").unwrap(),
            ..Default::default()
        })
        .unwrap();
        Config {
            watch_dirs: vec![td.to_path_buf()],
            rules: RuleSet::new(vec![rule]),
            poll_interval: Duration::from_millis(50),
            quiet_window: Duration::ZERO,
            ..Config::default()
        }
    }

    #[test]
    fn build_and_teardown_drains_registry() {
        crate::shutdown::reset();
        let td = tempdir().unwrap();
        let mut cfg = minimal_config(td.path());
        cfg.ledger_file = Some(td.path().join("ledger.txt"));
        let ctx = AppContext::build(cfg, None).unwrap();
        assert_eq!(ctx.tracked_paths(), 0);
        ctx.teardown(ShutdownMode::Drain).unwrap();
    }

    #[test]
    fn registry_reports_leftovers() {
        let reg = ComponentRegistry::default();
        reg.register("a");
        reg.register("b");
        reg.deregister("a");
        assert_eq!(reg.remaining(), vec!["b".to_string()]);
    }

    #[test]
    fn servers_without_backend_disable_sync() {
        crate::shutdown::reset();
        let td = tempdir().unwrap();
        let mut cfg = minimal_config(td.path());
        cfg.servers = vec![crate::sync::ServerConfig {
            name: "alpha".into(),
            host: "h".into(),
            dirs: vec!["d".into()],
            ..Default::default()
        }];
        let ctx = AppContext::build(cfg, None).unwrap();
        assert!(ctx.sync.is_none());
        ctx.teardown(ShutdownMode::Discard).unwrap();
    }
}
