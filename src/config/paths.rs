//! Default path helpers and symlink checks.
//! Determines OS-appropriate config/log/ledger paths and detects symlinked
//! ancestors for safety.

use anyhow::{Context, Result, anyhow};
use dirs::{config_dir, data_dir};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Config path: SLUICE_CONFIG wins; otherwise the OS config dir.
pub fn default_config_path() -> Result<PathBuf> {
    if let Some(p) = env::var_os("SLUICE_CONFIG") {
        let p = PathBuf::from(p);
        if p.is_dir() {
            return Ok(p.join("config.xml"));
        }
        return Ok(p);
    }
    let mut base = config_dir().ok_or_else(|| anyhow!("could not determine a config directory"))?;
    base.push("sluice");
    base.push("config.xml");
    Ok(base)
}

/// OS-appropriate default log file path (data dir).
pub fn default_log_path() -> Result<PathBuf> {
    let mut base = data_dir().ok_or_else(|| anyhow!("could not determine a data directory"))?;
    base.push("sluice");
    fs::create_dir_all(&base)
        .with_context(|| format!("failed to create {}", base.display()))?;
    base.push("sluice.log");
    Ok(base)
}

/// Default location of the download ledger (data dir).
pub fn default_ledger_path() -> Result<PathBuf> {
    let mut base = data_dir().ok_or_else(|| anyhow!("could not determine a data directory"))?;
    base.push("sluice");
    base.push("ledger.txt");
    Ok(base)
}

/// Return true if any existing ancestor of `path` is a symlink.
pub fn path_has_symlink_ancestor(path: &Path) -> io::Result<bool> {
    let mut p = path.parent();
    while let Some(anc) = p {
        if anc.exists() {
            let meta = fs::symlink_metadata(anc)?;
            if meta.file_type().is_symlink() {
                return Ok(true);
            }
        }
        p = anc.parent();
    }
    Ok(false)
}
