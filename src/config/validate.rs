//! Configuration validation.
//! Checks the loaded config against the filesystem before any thread starts,
//! so misconfiguration fails the process instead of surfacing mid-pipeline.

use anyhow::{Context, Result, bail};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::sync::SEPARATOR;

use super::types::Config;

/// Validate `cfg` and canonicalize its directory paths in place.
pub fn validate(cfg: &mut Config) -> Result<()> {
    if cfg.watch_dirs.is_empty() && cfg.servers.is_empty() {
        bail!("config defines no watch_dir and no server; nothing to do");
    }
    if cfg.rules.is_empty() {
        bail!("config defines no rules; arrivals could never be routed");
    }

    for dir in &mut cfg.watch_dirs {
        *dir = writable_dir(dir).context("watch_dir")?;
    }
    for dir in &mut cfg.staging_dirs {
        *dir = writable_dir(dir).context("staging_dir")?;
    }

    let mut names = HashSet::new();
    for server in &cfg.servers {
        if server.name.is_empty() {
            bail!("server entry is missing a name");
        }
        if server.name.contains(SEPARATOR) {
            bail!(
                "server name '{}' contains '{SEPARATOR}', which is reserved",
                server.name
            );
        }
        if !names.insert(server.name.clone()) {
            bail!("duplicate server name '{}'", server.name);
        }
        if server.host.is_empty() {
            bail!("server '{}' has no host", server.name);
        }
        if server.dirs.is_empty() {
            bail!("server '{}' lists no remote directories", server.name);
        }
    }
    if !cfg.servers.is_empty() && cfg.staging_dirs.is_empty() {
        bail!("servers are configured but no staging_dir is set");
    }
    Ok(())
}

/// Confirm `dir` is an existing, writable directory; return its canonical form.
fn writable_dir(dir: &Path) -> Result<PathBuf> {
    let meta = fs::metadata(dir)
        .with_context(|| format!("{} does not exist", dir.display()))?;
    if !meta.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let probe = dir.join(format!(".sluice-write-test-{}", std::process::id()));
    fs::write(&probe, b"")
        .with_context(|| format!("{} is not writable", dir.display()))?;
    let _ = fs::remove_file(&probe);
    dunce::canonicalize(dir)
        .with_context(|| format!("cannot canonicalize {}", dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::OperatorSpec;
    use crate::rules::{Rule, RuleSet, RuleSpec};
    use crate::sync::ServerConfig;
    use tempfile::tempdir;

    fn base_config(watch: PathBuf) -> Config {
        let rule = Rule::compile(RuleSpec {
            name: "all".into(),
            target: "/out".into(),
            operator: OperatorSpec::builtin("move").unwrap(),
            ..Default::default()
        })
        .unwrap();
        Config {
            watch_dirs: vec![watch],
            rules: RuleSet::new(vec![rule]),
            ..Config::default()
        }
    }

    #[test]
    fn accepts_existing_writable_dir() {
        let td = tempdir().unwrap();
        let mut cfg = base_config(td.path().to_path_buf());
        validate(&mut cfg).unwrap();
        assert_eq!(cfg.watch_dirs[0], dunce::canonicalize(td.path()).unwrap());
    }

    #[test]
    fn rejects_missing_watch_dir() {
        let td = tempdir().unwrap();
        let mut cfg = base_config(td.path().join("nope"));
        assert!(validate(&mut cfg).is_err());
    }

    #[test]
    fn rejects_empty_rule_set() {
        let td = tempdir().unwrap();
        let mut cfg = base_config(td.path().to_path_buf());
        cfg.rules = RuleSet::default();
        assert!(validate(&mut cfg).is_err());
    }

    #[test]
    fn rejects_reserved_server_name() {
        let td = tempdir().unwrap();
        let mut cfg = base_config(td.path().to_path_buf());
        cfg.staging_dirs = vec![td.path().to_path_buf()];
        cfg.servers = vec![ServerConfig {
            name: "a|b".into(),
            host: "h".into(),
            dirs: vec!["d".into()],
            ..ServerConfig::default()
        }];
        assert!(validate(&mut cfg).is_err());
    }

    #[test]
    fn servers_require_staging_dirs() {
        let td = tempdir().unwrap();
        let mut cfg = base_config(td.path().to_path_buf());
        cfg.servers = vec![ServerConfig {
            name: "alpha".into(),
            host: "h".into(),
            dirs: vec!["d".into()],
            ..ServerConfig::default()
        }];
        assert!(validate(&mut cfg).is_err());
    }
}
