//! Stability detection: deciding when a file or tree is safe to move.

mod probe;
mod tracker;

pub use probe::{ExclusiveOpenProbe, RenameProbe, StabilityProbe, default_probe};
pub use tracker::{ReadyFn, StabilityTracker};
