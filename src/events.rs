//! Structured audit events.
//!
//! The core emits these for every externally interesting outcome; rendering
//! and delivery (log files, mail, push) belong to the consumer of the sink.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};

/// Everything an audit/notification collaborator needs to render an event.
#[derive(Debug, Clone)]
pub enum AuditEvent {
    /// A candidate path entered stability tracking.
    Seen { path: PathBuf },
    /// A remote entry was downloaded into a staging directory.
    Downloaded { server: String, remote_path: String, local: PathBuf },
    /// An operator chain completed; `to` is the final produced path.
    Moved {
        rule: String,
        operator: String,
        from: PathBuf,
        to: PathBuf,
    },
    /// An existing destination was removed before a move (configured policy).
    DuplicateDeleted { path: PathBuf },
    /// A recoverable per-item failure; processing continued elsewhere.
    Error {
        scope: &'static str,
        path: Option<PathBuf>,
        detail: String,
    },
}

/// Sink for audit events. Implementations must not block the pipeline.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

pub type SharedSink = Arc<dyn AuditSink>;

/// Default sink: structured tracing fields, no human formatting beyond that.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, event: &AuditEvent) {
        match event {
            AuditEvent::Seen { path } => {
                info!(event = "seen", path = %path.display(), "candidate registered");
            }
            AuditEvent::Downloaded { server, remote_path, local } => {
                info!(event = "downloaded", server, remote = %remote_path, local = %local.display(), "remote entry downloaded");
            }
            AuditEvent::Moved { rule, operator, from, to } => {
                info!(event = "moved", rule, operator, from = %from.display(), to = %to.display(), "operator chain completed");
            }
            AuditEvent::DuplicateDeleted { path } => {
                info!(event = "duplicate_deleted", path = %path.display(), "existing destination removed");
            }
            AuditEvent::Error { scope, path, detail } => match path {
                Some(p) => error!(event = "error", scope, path = %p.display(), detail, "pipeline error"),
                None => error!(event = "error", scope, detail, "pipeline error"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Collects events for assertions in unit tests.
    pub struct CollectingSink(pub Mutex<Vec<AuditEvent>>);

    impl AuditSink for CollectingSink {
        fn record(&self, event: &AuditEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn tracing_sink_accepts_all_variants() {
        let sink = TracingSink;
        sink.record(&AuditEvent::Seen { path: "/a".into() });
        sink.record(&AuditEvent::Error {
            scope: "test",
            path: None,
            detail: "detail".into(),
        });
    }
}
