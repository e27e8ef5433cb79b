//! Serialized move dispatch.
//!
//! Exactly one worker thread drains an unbounded FIFO of pending moves. This
//! is intentional: moves target a shared destination filesystem, and
//! serializing them avoids directory-creation races and partial-tree
//! interleaving. Per-item failures are logged and audited; the worker keeps
//! going. Shutdown either drains the remaining queue (process exit, so no
//! file is lost mid-flight) or discards it (reconfiguration).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::errors::SluiceError;
use crate::events::{AuditEvent, SharedSink};
use crate::operator::{self, ChainCtx, OperatorSpec};

/// One enqueued move: consumed exactly once by the worker.
pub struct PendingMove {
    pub from: PathBuf,
    pub to: PathBuf,
    pub operator: Arc<OperatorSpec>,
    pub rule: String,
}

/// How to treat queued items at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Finish everything already queued, then stop.
    Drain,
    /// Drop everything still queued and stop immediately.
    Discard,
}

/// Settings the worker needs for chain execution.
#[derive(Debug, Clone, Default)]
pub struct DispatchSettings {
    pub delete_duplicates: bool,
    pub file_mode: Option<u32>,
    pub dir_mode: Option<u32>,
}

pub struct Dispatcher {
    tx: Mutex<Option<Sender<PendingMove>>>,
    discard: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn the single dispatch worker.
    pub fn start(
        settings: DispatchSettings,
        sink: SharedSink,
        sync_lock: Option<Arc<Mutex<()>>>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<PendingMove>();
        let discard = Arc::new(AtomicBool::new(false));
        let worker = {
            let discard = Arc::clone(&discard);
            std::thread::Builder::new()
                .name("sluice-dispatch".into())
                .spawn(move || worker_loop(rx, settings, sink, sync_lock, discard))
                .expect("failed to spawn dispatch worker")
        };
        Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            discard,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Enqueue a move. Non-blocking; silently ignored after shutdown.
    pub fn submit(&self, item: PendingMove) {
        let guard = self.tx.lock().unwrap();
        match guard.as_ref() {
            Some(tx) => {
                debug!(from = %item.from.display(), to = %item.to.display(), rule = %item.rule, "move enqueued");
                let _ = tx.send(item);
            }
            None => {
                warn!(from = %item.from.display(), "dispatcher shut down; move ignored");
            }
        }
    }

    /// Stop accepting items and terminate the worker per `mode`. Idempotent.
    pub fn shutdown(&self, mode: ShutdownMode) {
        if mode == ShutdownMode::Discard {
            self.discard.store(true, Ordering::Relaxed);
        }
        // Dropping the sender lets the worker observe disconnect after the
        // queue is consumed.
        self.tx.lock().unwrap().take();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            if let Err(e) = handle.join() {
                error!(?e, "dispatch worker panicked");
            }
        }
        info!(?mode, "dispatcher stopped");
    }

    /// Whether the dispatcher still accepts submissions.
    pub fn is_accepting(&self) -> bool {
        self.tx.lock().unwrap().is_some()
    }
}

fn worker_loop(
    rx: Receiver<PendingMove>,
    settings: DispatchSettings,
    sink: SharedSink,
    sync_lock: Option<Arc<Mutex<()>>>,
    discard: Arc<AtomicBool>,
) {
    loop {
        let item = match rx.recv_timeout(Duration::from_secs(60)) {
            Ok(item) => item,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if discard.load(Ordering::Relaxed) {
            debug!(from = %item.from.display(), "discarding queued move at shutdown");
            continue;
        }
        // The optional global lock sequences downloads against moves; it is
        // taken per item, never across the whole queue.
        let _phase = sync_lock.as_ref().map(|l| l.lock().unwrap());
        process(&item, &settings, sink.as_ref());
    }
    debug!("dispatch worker exiting");
}

fn process(item: &PendingMove, settings: &DispatchSettings, sink: &dyn crate::events::AuditSink) {
    let ctx = ChainCtx {
        sink,
        delete_duplicates: settings.delete_duplicates,
        file_mode: if item.operator.set_permissions {
            settings.file_mode
        } else {
            None
        },
        dir_mode: settings.dir_mode,
    };
    match operator::execute(&item.operator, &item.from, &item.to, &ctx) {
        Ok(final_path) => {
            sink.record(&AuditEvent::Moved {
                rule: item.rule.clone(),
                operator: item.operator.name.clone(),
                from: item.from.clone(),
                to: final_path,
            });
        }
        Err(e) => {
            let code = e
                .downcast_ref::<SluiceError>()
                .map(SluiceError::code)
                .unwrap_or("move_error");
            error!(code, rule = %item.rule, from = %item.from.display(), to = %item.to.display(), error = %e, "move failed");
            sink.record(&AuditEvent::Error {
                scope: "dispatch",
                path: Some(item.from.clone()),
                detail: e.to_string(),
            });
        }
    }
}
