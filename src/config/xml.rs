//! XML configuration support.
//! - Loads settings from config.xml (quick_xml).
//! - Creates a secure template if missing (unless SLUICE_CONFIG is set).
//!
//! Notes:
//! - This module only reads/writes the config file; directory validation
//!   happens in `validate`.
//! - Unknown XML fields are a hard failure (serde deny_unknown_fields) to
//!   surface misconfigurations early.

use anyhow::{Context, Result, bail};
use quick_xml::de::from_str as from_xml_str;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::operator::OperatorSpec;
use crate::rules::{MatchMode, Rule, RuleSet, RuleSpec};
use crate::sync::ServerConfig;
use crate::template::TargetTemplate;

use super::paths::default_config_path;
use super::types::{Config, LogLevel};

/// Struct mirroring the XML config for deserialization.
#[derive(Debug, Deserialize)]
#[serde(rename = "config")]
#[serde(deny_unknown_fields)]
struct XmlConfig {
    #[serde(rename = "watch_dir", default)]
    watch_dirs: Vec<String>,
    poll_interval_seconds: Option<u64>,
    quiet_seconds: Option<u64>,
    delete_duplicates: Option<bool>,
    /// Octal strings, e.g. "0644".
    file_mode: Option<String>,
    dir_mode: Option<String>,
    exclusive_sync: Option<bool>,
    log_level: Option<String>,
    log_file: Option<String>,
    ledger_file: Option<String>,
    sync_interval_seconds: Option<u64>,
    min_free_mb: Option<u64>,
    #[serde(rename = "staging_dir", default)]
    staging_dirs: Vec<String>,
    #[serde(rename = "rule", default)]
    rules: Vec<XmlRule>,
    #[serde(rename = "server", default)]
    servers: Vec<XmlServer>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct XmlRule {
    name: String,
    #[serde(rename = "pattern", default)]
    patterns: Vec<String>,
    #[serde(rename = "exclude", default)]
    excludes: Vec<String>,
    /// Comma-separated list, e.g. "mkv,mp4".
    extensions: Option<String>,
    /// "partial" (default) or "full".
    mode: Option<String>,
    priority: Option<i32>,
    target: String,
    /// move (default), copy, symlink, move-symlink, tag, noop.
    operator: Option<String>,
    tool_program: Option<String>,
    tool_args: Option<String>,
    untagged_target: Option<String>,
    set_permissions: Option<bool>,
    #[serde(rename = "notify", default)]
    notify: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct XmlServer {
    name: String,
    host: String,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    fingerprint: Option<String>,
    #[serde(rename = "dir", default)]
    dirs: Vec<String>,
    real_prefix: Option<String>,
    rule_guard: Option<bool>,
}

/// Result of the initial "is there a config yet" check.
#[derive(Debug, PartialEq, Eq)]
pub enum LoadResult {
    /// No file existed; a template was written at the returned path.
    CreatedTemplate(PathBuf),
    /// A config file exists at the returned path.
    Present(PathBuf),
}

/// Ensure a config file exists; create a template at the default location if
/// none does (only when SLUICE_CONFIG is unset).
pub fn load_or_init() -> Result<LoadResult> {
    let env_set = env::var_os("SLUICE_CONFIG").is_some();
    let cfg_path = default_config_path()?;
    if cfg_path.exists() {
        return Ok(LoadResult::Present(cfg_path));
    }
    if env_set {
        bail!(
            "SLUICE_CONFIG points at {} but the file does not exist",
            cfg_path.display()
        );
    }
    create_template_config(&cfg_path)
        .with_context(|| format!("failed to write template config at {}", cfg_path.display()))?;
    Ok(LoadResult::CreatedTemplate(cfg_path))
}

/// Load and compile the configuration at `path`.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;
    let parsed: XmlConfig = from_xml_str(&content)
        .with_context(|| format!("malformed config file {}", path.display()))?;
    into_config(parsed)
}

fn into_config(xml: XmlConfig) -> Result<Config> {
    let mut cfg = Config::default();
    cfg.watch_dirs = xml
        .watch_dirs
        .iter()
        .map(|s| PathBuf::from(s.trim()))
        .collect();
    if let Some(secs) = xml.poll_interval_seconds {
        cfg.poll_interval = Duration::from_secs(secs.max(1));
    }
    if let Some(secs) = xml.quiet_seconds {
        cfg.quiet_window = Duration::from_secs(secs);
    }
    cfg.delete_duplicates = xml.delete_duplicates.unwrap_or(false);
    cfg.file_mode = parse_mode(xml.file_mode.as_deref()).context("file_mode")?;
    cfg.dir_mode = parse_mode(xml.dir_mode.as_deref()).context("dir_mode")?;
    cfg.exclusive_sync = xml.exclusive_sync.unwrap_or(false);
    if let Some(lvl) = xml.log_level.as_deref() {
        cfg.log_level = LogLevel::parse(lvl.trim())
            .with_context(|| format!("invalid log_level '{lvl}'"))?;
    }
    if let Some(lf) = xml.log_file.as_deref() {
        let lf = lf.trim();
        cfg.log_file = if lf.is_empty() {
            None
        } else {
            Some(PathBuf::from(lf))
        };
    }
    if let Some(l) = xml.ledger_file.as_deref() {
        cfg.ledger_file = Some(PathBuf::from(l.trim()));
    }
    if let Some(secs) = xml.sync_interval_seconds {
        cfg.sync_interval = Duration::from_secs(secs.max(1));
    }
    if let Some(mb) = xml.min_free_mb {
        cfg.min_free_bytes = mb * 1024 * 1024;
    }
    cfg.staging_dirs = xml
        .staging_dirs
        .iter()
        .map(|s| PathBuf::from(s.trim()))
        .collect();

    let mut rules = Vec::with_capacity(xml.rules.len());
    for r in xml.rules {
        rules.push(compile_rule(r)?);
    }
    cfg.rules = RuleSet::new(rules);

    cfg.servers = xml
        .servers
        .into_iter()
        .map(|s| ServerConfig {
            name: s.name.trim().to_string(),
            host: s.host.trim().to_string(),
            port: s.port.unwrap_or(22),
            username: s.username.unwrap_or_default(),
            password: s.password,
            host_fingerprint: s.fingerprint,
            dirs: s.dirs.iter().map(|d| d.trim().to_string()).collect(),
            real_prefix: s.real_prefix,
            rule_guard: s.rule_guard.unwrap_or(false),
        })
        .collect();
    Ok(cfg)
}

fn compile_rule(xml: XmlRule) -> Result<Rule> {
    let mode = match xml.mode.as_deref().map(str::trim) {
        None | Some("") | Some("partial") => MatchMode::Partial,
        Some("full") => MatchMode::Full,
        Some(other) => bail!("rule '{}': invalid mode '{other}'", xml.name),
    };
    let operator = match xml.operator.as_deref().map(str::trim).unwrap_or("move") {
        "tag" => {
            let program = xml
                .tool_program
                .clone()
                .with_context(|| format!("rule '{}': tag operator needs tool_program", xml.name))?;
            let args = xml
                .tool_args
                .as_deref()
                .map(|a| a.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default();
            let untagged = xml
                .untagged_target
                .as_deref()
                .map(TargetTemplate::parse)
                .transpose()
                .with_context(|| format!("rule '{}': untagged_target", xml.name))?;
            OperatorSpec::tagging(program, args, untagged)
        }
        name => OperatorSpec::builtin(name)
            .with_context(|| format!("rule '{}'", xml.name))?,
    };
    let mut operator = operator;
    operator.set_permissions = xml.set_permissions.unwrap_or(false);

    Rule::compile(RuleSpec {
        name: xml.name,
        patterns: xml.patterns,
        excludes: xml.excludes,
        extensions: xml
            .extensions
            .as_deref()
            .map(|s| {
                s.split(',')
                    .map(|e| e.trim().to_string())
                    .filter(|e| !e.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
        mode,
        priority: xml.priority.unwrap_or(0),
        target: xml.target,
        operator,
        notify: xml.notify,
    })
}

/// Parse an octal mode string like "0644".
fn parse_mode(s: Option<&str>) -> Result<Option<u32>> {
    match s.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => {
            let mode = u32::from_str_radix(v.trim_start_matches("0o"), 8)
                .with_context(|| format!("invalid octal mode '{v}'"))?;
            Ok(Some(mode))
        }
    }
}

/// Create parent directory and write a small secure template config file.
fn create_template_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
        let _ = crate::platform::set_mode(parent, 0o700);
    }
    let content = r#"<config>
  <watch_dir>/data/incoming</watch_dir>
  <poll_interval_seconds>10</poll_interval_seconds>
  <quiet_seconds>60</quiet_seconds>
  <log_level>normal</log_level>
  <rule>
    <name>everything</name>
    <target>/data/sorted</target>
    <operator>move</operator>
  </rule>
</config>
"#;
    fs::write(path, content)?;
    let _ = crate::platform::set_mode(path, 0o600);
    info!("Created template config at {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"<config>
  <watch_dir> /data/incoming </watch_dir>
  <watch_dir>/data/drop</watch_dir>
  <poll_interval_seconds>5</poll_interval_seconds>
  <quiet_seconds>30</quiet_seconds>
  <delete_duplicates>true</delete_duplicates>
  <file_mode>0644</file_mode>
  <dir_mode>0755</dir_mode>
  <exclusive_sync>true</exclusive_sync>
  <log_level>debug</log_level>
  <ledger_file>/var/lib/sluice/ledger.txt</ledger_file>
  <sync_interval_seconds>600</sync_interval_seconds>
  <min_free_mb>2048</min_free_mb>
  <staging_dir>/data/incoming</staging_dir>
  <rule>
    <name>tv</name>
    <pattern>s\d+e\d+</pattern>
    <exclude>sample</exclude>
    <extensions>mkv, mp4</extensions>
    <mode>partial</mode>
    <priority>5</priority>
    <target>/tv/$yyyy$</target>
    <operator>move-symlink</operator>
    <set_permissions>true</set_permissions>
    <notify>ops</notify>
  </rule>
  <server>
    <name>alpha</name>
    <host>seed.example.org</host>
    <port>2222</port>
    <username>sluice</username>
    <dir>done/tv</dir>
    <dir>done/movies</dir>
    <real_prefix>files/real</real_prefix>
    <rule_guard>true</rule_guard>
  </server>
</config>
"#;

    #[test]
    fn full_config_parses() {
        let xml: XmlConfig = from_xml_str(FULL).unwrap();
        let cfg = into_config(xml).unwrap();
        assert_eq!(cfg.watch_dirs, vec![PathBuf::from("/data/incoming"), PathBuf::from("/data/drop")]);
        assert_eq!(cfg.poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.quiet_window, Duration::from_secs(30));
        assert!(cfg.delete_duplicates);
        assert_eq!(cfg.file_mode, Some(0o644));
        assert_eq!(cfg.dir_mode, Some(0o755));
        assert!(cfg.exclusive_sync);
        assert_eq!(cfg.log_level, LogLevel::Debug);
        assert_eq!(cfg.min_free_bytes, 2048 * 1024 * 1024);
        assert!(!cfg.rules.is_empty());
        assert_eq!(cfg.servers.len(), 1);
        assert_eq!(cfg.servers[0].port, 2222);
        assert_eq!(cfg.servers[0].dirs.len(), 2);
        assert!(cfg.servers[0].rule_guard);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let xml = "<config><nonsense>1</nonsense></config>";
        assert!(from_xml_str::<XmlConfig>(xml).is_err());
    }

    #[test]
    fn invalid_mode_string_fails() {
        let xml = "<config><file_mode>99x</file_mode></config>";
        let parsed: XmlConfig = from_xml_str(xml).unwrap();
        assert!(into_config(parsed).is_err());
    }

    #[test]
    fn bad_rule_template_fails_at_load() {
        let xml = r#"<config>
  <rule><name>broken</name><target>/x/$yyyy</target></rule>
</config>"#;
        let parsed: XmlConfig = from_xml_str(xml).unwrap();
        assert!(into_config(parsed).is_err());
    }

    #[test]
    fn tag_operator_requires_program() {
        let xml = r#"<config>
  <rule><name>t</name><target>/x</target><operator>tag</operator></rule>
</config>"#;
        let parsed: XmlConfig = from_xml_str(xml).unwrap();
        assert!(into_config(parsed).is_err());
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let xml = "<config><watch_dir>/in</watch_dir></config>";
        let parsed: XmlConfig = from_xml_str(xml).unwrap();
        let cfg = into_config(parsed).unwrap();
        assert_eq!(cfg.poll_interval, super::super::types::POLL_INTERVAL_DEFAULT);
        assert!(!cfg.delete_duplicates);
        assert!(cfg.rules.is_empty());
        assert!(cfg.servers.is_empty());
    }
}
