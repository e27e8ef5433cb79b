//! Platform-specific helpers: permission bits, free-space queries, and the
//! capability check that selects the stability probe strategy at startup.

use std::fs;
use std::io;
use std::path::Path;

use walkdir::WalkDir;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Available bytes on the filesystem holding `path`.
pub fn free_space(path: &Path) -> io::Result<u64> {
    fs2::available_space(path)
}

/// Whether this platform supports a reliable exclusive read-write open as a
/// "no other writer" probe. Where it doesn't, the rename-trick probe is used.
pub fn exclusive_open_supported() -> bool {
    cfg!(unix)
}

/// Apply `mode` to a single path (no-op on non-Unix).
#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Recursively apply configured file/dir modes under `path`.
/// Best-effort per entry: the first error is returned but entries before it
/// keep their new modes.
pub fn apply_modes_recursive(
    path: &Path,
    file_mode: Option<u32>,
    dir_mode: Option<u32>,
) -> io::Result<()> {
    if path.is_file() {
        if let Some(m) = file_mode {
            set_mode(path, m)?;
        }
        return Ok(());
    }
    for entry in WalkDir::new(path).into_iter().filter_map(Result::ok) {
        let mode = if entry.file_type().is_dir() {
            dir_mode
        } else {
            file_mode
        };
        if let Some(m) = mode {
            set_mode(entry.path(), m)?;
        }
    }
    Ok(())
}

/// Open a log file for appending, creating it owner-only on Unix.
pub fn open_log_file_secure_append(path: &Path) -> io::Result<fs::File> {
    let mut opts = fs::OpenOptions::new();
    opts.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts.open(path)
}

/// Create a symlink at `link` pointing to `target`.
#[cfg(unix)]
pub fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
pub fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn free_space_reports_nonzero_for_tempdir() {
        let td = tempdir().unwrap();
        let avail = free_space(td.path()).unwrap();
        assert!(avail > 0);
    }

    #[cfg(unix)]
    #[test]
    fn apply_modes_sets_file_and_dir_bits() {
        use std::os::unix::fs::PermissionsExt;
        let td = tempdir().unwrap();
        let dir = td.path().join("inner");
        fs::create_dir(&dir).unwrap();
        let file = dir.join("a.txt");
        fs::write(&file, b"x").unwrap();

        apply_modes_recursive(td.path(), Some(0o640), Some(0o750)).unwrap();

        let fmode = fs::metadata(&file).unwrap().permissions().mode() & 0o777;
        let dmode = fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(fmode, 0o640);
        assert_eq!(dmode, 0o750);
    }
}
