//! An mtime change with an unchanged size must reset the stability clock.

use filetime::FileTime;
use std::fs;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

use sluice::events::TracingSink;
use sluice::stability::{ExclusiveOpenProbe, StabilityTracker};

#[test]
fn touched_file_is_not_ready_until_it_quiesces_again() {
    let td = tempdir().unwrap();
    let f = td.path().join("rewritten.bin");
    fs::write(&f, b"same length").unwrap();

    let (tx, rx) = mpsc::channel();
    let tracker = StabilityTracker::new(
        Box::new(ExclusiveOpenProbe),
        Duration::from_millis(10),
        Duration::ZERO,
        Arc::new(TracingSink),
        Box::new(move |p| {
            let _ = tx.send(p);
        }),
    );
    tracker.submit(f.clone());

    // Same size, newer mtime: an in-place rewrite.
    filetime::set_file_mtime(&f, FileTime::from_unix_time(4_102_444_800, 0)).unwrap();
    tracker.poll_once();
    assert!(rx.try_recv().is_err(), "mtime change resets readiness");

    tracker.poll_once();
    assert_eq!(rx.try_recv().unwrap(), f);
}
