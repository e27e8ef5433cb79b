//! Writer-detection probes.
//!
//! A quiescent size/mtime pair is necessary but not sufficient: a writer can
//! hold a file open without touching it for a while. The probe supplies the
//! platform-dependent "is anyone still holding this?" check, selected once at
//! startup rather than scattered through the poll loop.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

/// Strategy for probing whether a file is free of writers.
pub trait StabilityProbe: Send + Sync {
    /// Ok(true) when no other writer holds the file; Ok(false) to retry next
    /// poll; Err for unexpected filesystem failures.
    fn probe(&self, path: &Path) -> io::Result<bool>;

    /// A path the probe itself re-created, which the watcher will report as a
    /// fresh arrival and the tracker must suppress. None for passive probes.
    fn take_suppressed(&self) -> Option<PathBuf> {
        None
    }
}

/// POSIX: an exclusive read-write open succeeds only when no other process
/// has the file open for writing with advisory coordination, and fails with
/// EBUSY/ETXTBSY style errors while a writer holds it.
pub struct ExclusiveOpenProbe;

impl StabilityProbe for ExclusiveOpenProbe {
    fn probe(&self, path: &Path) -> io::Result<bool> {
        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                // Read-only files cannot be opened RW but are also not being
                // written; treat as free.
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e),
            Err(_) => Ok(false),
        }
    }
}

/// Platforms without reliable open-exclusivity: rename the file to a sentinel
/// name and back. A locked file cannot be renamed; success means no writer.
/// The rename-back makes the original name reappear, so it is handed to the
/// tracker's suppression set.
pub struct RenameProbe {
    suppressed: std::sync::Mutex<Vec<PathBuf>>,
}

impl RenameProbe {
    pub const SENTINEL_SUFFIX: &'static str = ".sluice.probe";

    pub fn new() -> Self {
        Self {
            suppressed: std::sync::Mutex::new(Vec::new()),
        }
    }
}

impl Default for RenameProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl StabilityProbe for RenameProbe {
    fn probe(&self, path: &Path) -> io::Result<bool> {
        let mut sentinel = path.as_os_str().to_os_string();
        sentinel.push(Self::SENTINEL_SUFFIX);
        let sentinel = PathBuf::from(sentinel);

        match std::fs::rename(path, &sentinel) {
            Ok(()) => {
                std::fs::rename(&sentinel, path)?;
                self.suppressed.lock().unwrap().push(path.to_path_buf());
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e),
            Err(_) => Ok(false),
        }
    }

    fn take_suppressed(&self) -> Option<PathBuf> {
        self.suppressed.lock().unwrap().pop()
    }
}

/// Pick the probe for this platform once at startup.
pub fn default_probe() -> Box<dyn StabilityProbe> {
    if crate::platform::exclusive_open_supported() {
        Box::new(ExclusiveOpenProbe)
    } else {
        Box::new(RenameProbe::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn exclusive_open_passes_for_quiet_file() {
        let td = tempdir().unwrap();
        let f = td.path().join("quiet.txt");
        fs::write(&f, b"x").unwrap();
        assert!(ExclusiveOpenProbe.probe(&f).unwrap());
    }

    #[test]
    fn exclusive_open_errors_for_missing_file() {
        let td = tempdir().unwrap();
        assert!(ExclusiveOpenProbe.probe(&td.path().join("gone")).is_err());
    }

    #[test]
    fn rename_probe_roundtrips_and_records_suppression() {
        let td = tempdir().unwrap();
        let f = td.path().join("file.bin");
        fs::write(&f, b"x").unwrap();

        let probe = RenameProbe::new();
        assert!(probe.probe(&f).unwrap());
        assert!(f.exists(), "file renamed back after probe");
        assert_eq!(probe.take_suppressed(), Some(f.clone()));
        assert_eq!(probe.take_suppressed(), None);
    }
}
