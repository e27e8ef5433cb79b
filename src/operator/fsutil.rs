//! Low-level filesystem helpers used by chain steps.
//! Atomic rename with copy+remove fallback, parallel directory copy, disk
//! space checks, and unique temp naming.

use anyhow::{Context, Result, bail};
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::errors::SluiceError;
use crate::platform;

/// Total size of a file or tree, in bytes.
pub fn entry_size(path: &Path) -> u64 {
    if path.is_file() {
        fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    } else {
        WalkDir::new(path)
            .into_iter()
            .filter_map(Result::ok)
            .filter_map(|e| e.metadata().ok())
            .filter(|m| m.is_file())
            .map(|m| m.len())
            .sum()
    }
}

/// Fail with `InsufficientSpace` when the destination filesystem cannot hold
/// the source.
pub fn check_disk_space(src: &Path, dest_dir: &Path) -> Result<()> {
    let required = entry_size(src);
    let available = platform::free_space(dest_dir)
        .with_context(|| format!("failed to stat filesystem for {}", dest_dir.display()))?;
    if required > available {
        return Err(SluiceError::InsufficientSpace {
            required,
            available,
            dest: dest_dir.to_path_buf(),
        }
        .into());
    }
    Ok(())
}

/// Move `src` to `dest`: atomic rename first, copy+remove across filesystems.
pub fn move_path(src: &Path, dest: &Path) -> Result<()> {
    if !src.exists() {
        return Err(SluiceError::SourceMissing(src.to_path_buf()).into());
    }
    if let Some(parent) = dest.parent() {
        check_disk_space_best_effort(src, parent);
    }
    match fs::rename(src, dest) {
        Ok(()) => {
            info!(src = %src.display(), dest = %dest.display(), "renamed atomically");
            Ok(())
        }
        Err(e) => {
            let hint = rename_failure_hint(&e);
            warn!(error = %e, hint, "atomic rename failed, using copy+remove");
            copy_path(src, dest)?;
            remove_path(src)
                .with_context(|| format!("failed to remove original {}", src.display()))?;
            Ok(())
        }
    }
}

// A rename inside one filesystem needs no headroom; only warn-and-check when
// we might fall back to a copy.
fn check_disk_space_best_effort(src: &Path, dest_dir: &Path) {
    if let Err(e) = check_disk_space(src, dest_dir) {
        warn!(error = %e, "destination headroom check failed");
    }
}

#[cfg(unix)]
fn rename_failure_hint(e: &io::Error) -> &'static str {
    match e.raw_os_error() {
        Some(code) if code == libc::EXDEV => "cross-filesystem; will copy instead",
        Some(code) if code == libc::EACCES || code == libc::EPERM => {
            "permission denied; check destination perms"
        }
        _ => "falling back to copy",
    }
}

#[cfg(not(unix))]
fn rename_failure_hint(e: &io::Error) -> &'static str {
    match e.kind() {
        io::ErrorKind::PermissionDenied => "permission denied; check destination perms",
        _ => "falling back to copy",
    }
}

/// Copy a file or directory tree; source is left in place.
pub fn copy_path(src: &Path, dest: &Path) -> Result<()> {
    if src.is_file() {
        check_disk_space(src, dest.parent().unwrap_or_else(|| Path::new(".")))?;
        fs::copy(src, dest)
            .with_context(|| format!("copy failed {} -> {}", src.display(), dest.display()))?;
        return Ok(());
    }
    if !src.is_dir() {
        bail!("source is neither file nor directory: {}", src.display());
    }

    // Recreate the directory skeleton, then copy files in parallel.
    fs::create_dir_all(dest)?;
    for d in WalkDir::new(src)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_dir())
    {
        if let Ok(rel) = d.path().strip_prefix(src) {
            fs::create_dir_all(dest.join(rel))?;
        }
    }
    let files: Vec<PathBuf> = WalkDir::new(src)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.par_iter().try_for_each(|path| -> Result<()> {
        let rel = path.strip_prefix(src)?;
        let dst = dest.join(rel);
        fs::copy(path, &dst)
            .with_context(|| format!("failed copying {} -> {}", path.display(), dst.display()))?;
        Ok(())
    })?;
    Ok(())
}

/// Remove a file or directory tree.
pub fn remove_path(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Produce a unique sibling name when `candidate` already exists.
/// Format: "<stem>-<millis>-<pid>[.<ext>]".
pub fn unique_destination(candidate: &Path) -> PathBuf {
    if !candidate.exists() {
        return candidate.to_path_buf();
    }
    let epoch_ms = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let pid = std::process::id();

    let stem = candidate
        .file_stem()
        .map(|s| s.to_owned())
        .unwrap_or_else(|| std::ffi::OsStr::new("file").to_owned());
    let ext = candidate.extension().map(|e| e.to_owned());

    let mut name = std::ffi::OsString::new();
    name.push(&stem);
    name.push(format!("-{epoch_ms}-{pid}"));
    if let Some(ref e) = ext {
        name.push(".");
        name.push(e);
    }
    candidate.with_file_name(name)
}
