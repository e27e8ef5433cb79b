//! Remote sync: pulling new files down from remote servers into the local
//! pipeline, deduplicated through a persisted ledger.

mod engine;
mod ledger;
mod transfer;

pub use engine::{SyncDeps, SyncEngine};
pub use ledger::{DownloadLedger, SEPARATOR};
pub use transfer::{ProgressFn, RemoteSession, RemoteTransfer, ServerConfig};
