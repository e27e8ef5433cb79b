//! Rule matching.
//!
//! A rule pairs a match predicate (positive patterns, negative patterns,
//! extensions) with a destination template and an operator chain. Matching is
//! pure and side-effect-free; it is called concurrently by the move pipeline,
//! the sync engine's rule guard, and the preview surface.
//!
//! File-name matching is case-insensitive. A file matches when all three
//! hold: positive patterns are empty or at least one matches, extensions are
//! empty or one suffix-matches, and no negative pattern matches. A directory
//! matches in Partial mode when at least one contained file matches, in Full
//! mode only when every contained file does.
//!
//! Ambiguity is never resolved silently at the move stage: `match_one`
//! requires exactly one matching rule. Priority exists only for the preview
//! query.

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::errors::SluiceError;
use crate::operator::OperatorSpec;
use crate::template::TargetTemplate;

/// Partial: substring find semantics, any-child directory matching.
/// Full: anchored whole-name matching, all-children directory matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    #[default]
    Partial,
    Full,
}

/// Uncompiled rule fields as read from configuration.
#[derive(Debug, Clone, Default)]
pub struct RuleSpec {
    pub name: String,
    pub patterns: Vec<String>,
    pub excludes: Vec<String>,
    pub extensions: Vec<String>,
    pub mode: MatchMode,
    pub priority: i32,
    pub target: String,
    pub operator: OperatorSpec,
    pub notify: Vec<String>,
}

/// A compiled, immutable rule. Shared read-only after configuration load.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    patterns: Vec<Regex>,
    excludes: Vec<Regex>,
    extensions: Vec<String>,
    pub mode: MatchMode,
    pub priority: i32,
    pub template: TargetTemplate,
    pub operator: OperatorSpec,
    pub notify: Vec<String>,
}

fn compile(pattern: &str, mode: MatchMode) -> Result<Regex> {
    let anchored;
    let effective = match mode {
        MatchMode::Partial => pattern,
        MatchMode::Full => {
            anchored = format!("^(?:{pattern})$");
            &anchored
        }
    };
    RegexBuilder::new(effective)
        .case_insensitive(true)
        .build()
        .with_context(|| format!("invalid rule pattern '{pattern}'"))
}

impl Rule {
    /// Compile a rule spec; fails fast on bad patterns or templates.
    pub fn compile(spec: RuleSpec) -> Result<Self> {
        let patterns = spec
            .patterns
            .iter()
            .map(|p| compile(p, spec.mode))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("rule '{}'", spec.name))?;
        let excludes = spec
            .excludes
            .iter()
            .map(|p| compile(p, spec.mode))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("rule '{}'", spec.name))?;
        let template = TargetTemplate::parse(&spec.target)
            .with_context(|| format!("rule '{}'", spec.name))?;
        Ok(Self {
            name: spec.name,
            patterns,
            excludes,
            extensions: spec
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            mode: spec.mode,
            priority: spec.priority,
            template,
            operator: spec.operator,
            notify: spec.notify,
        })
    }

    /// Match a single file name (no directory semantics).
    pub fn matches_file(&self, name: &str) -> bool {
        let positive =
            self.patterns.is_empty() || self.patterns.iter().any(|re| re.is_match(name));
        if !positive {
            return false;
        }
        let ext_ok = self.extensions.is_empty()
            || self.extensions.iter().any(|ext| {
                name.to_ascii_lowercase()
                    .ends_with(&format!(".{ext}"))
            });
        if !ext_ok {
            return false;
        }
        !self.excludes.iter().any(|re| re.is_match(name))
    }

    /// Match a path: file name for files, contained files for directories.
    pub fn matches_path(&self, path: &Path) -> bool {
        if path.is_dir() {
            let mut seen_any = false;
            let mut all = true;
            let mut any = false;
            for entry in WalkDir::new(path)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
            {
                seen_any = true;
                let name = entry.file_name().to_string_lossy();
                if self.matches_file(&name) {
                    any = true;
                } else {
                    all = false;
                }
            }
            if !seen_any {
                return false;
            }
            match self.mode {
                MatchMode::Partial => any,
                MatchMode::Full => all,
            }
        } else {
            let name = match path.file_name() {
                Some(n) => n.to_string_lossy().into_owned(),
                None => return false,
            };
            self.matches_file(&name)
        }
    }

    /// Resolve this rule's destination for `path`.
    pub fn destination(&self, path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.template.resolve(&name)
    }
}

/// The full configured rule set.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Arc<Vec<Rule>>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules: Arc::new(rules),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// All rules matching `path`, in declaration order.
    pub fn matching(&self, path: &Path) -> Vec<&Rule> {
        self.rules.iter().filter(|r| r.matches_path(path)).collect()
    }

    /// Exactly-one-match lookup used by the move pipeline and the sync rule
    /// guard. Zero and multiple matches are both errors.
    pub fn match_one(&self, path: &Path) -> Result<&Rule, SluiceError> {
        let mut found = self.matching(path);
        match found.len() {
            1 => Ok(found.remove(0)),
            0 => Err(SluiceError::NoRuleMatch(path.to_path_buf())),
            _ => Err(SluiceError::AmbiguousRules {
                path: path.to_path_buf(),
                names: found.iter().map(|r| r.name.clone()).collect(),
            }),
        }
    }

    /// Preview query: highest-priority match and its resolved destination.
    pub fn preview(&self, path: &Path) -> Option<(&Rule, PathBuf)> {
        self.matching(path)
            .into_iter()
            .max_by_key(|r| r.priority)
            .map(|r| (r, r.destination(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn rule(name: &str, pattern: &str, mode: MatchMode) -> Rule {
        Rule::compile(RuleSpec {
            name: name.into(),
            patterns: vec![pattern.into()],
            target: "/out".into(),
            mode,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn positive_pattern_and_extension_and_exclude() {
        let r = Rule::compile(RuleSpec {
            name: "tv".into(),
            patterns: vec![r"s\d+e\d+".into()],
            excludes: vec!["sample".into()],
            extensions: vec!["mkv".into(), ".mp4".into()],
            target: "/tv".into(),
            ..Default::default()
        })
        .unwrap();
        assert!(r.matches_file("Show.S01E02.mkv"));
        assert!(!r.matches_file("Show.S01E02.nfo"), "extension filter");
        assert!(!r.matches_file("Show.S01E02.sample.mkv"), "exclude filter");
        assert!(!r.matches_file("Show.mkv"), "positive pattern");
    }

    #[test]
    fn empty_patterns_match_any_name() {
        let r = Rule::compile(RuleSpec {
            name: "all".into(),
            target: "/out".into(),
            ..Default::default()
        })
        .unwrap();
        assert!(r.matches_file("anything.bin"));
    }

    #[test]
    fn full_mode_anchors_pattern() {
        let partial = rule("p", r"show", MatchMode::Partial);
        let full = rule("f", r"show", MatchMode::Full);
        assert!(partial.matches_file("my-show.mkv"));
        assert!(!full.matches_file("my-show.mkv"));
        assert!(full.matches_file("SHOW"), "case-insensitive full match");
    }

    #[test]
    fn directory_partial_vs_full() {
        let td = tempdir().unwrap();
        let dir = td.path().join("batch");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("one.mkv"), b"x").unwrap();
        fs::write(dir.join("two.txt"), b"x").unwrap();

        let partial = rule("p", r"\.mkv$", MatchMode::Partial);
        let full = rule("f", r".*\.mkv", MatchMode::Full);
        assert!(partial.matches_path(&dir), "one of two matches");
        assert!(!full.matches_path(&dir), "full mode needs all files");

        fs::remove_file(dir.join("two.txt")).unwrap();
        assert!(full.matches_path(&dir));
    }

    #[test]
    fn empty_directory_never_matches() {
        let td = tempdir().unwrap();
        let dir = td.path().join("empty");
        fs::create_dir(&dir).unwrap();
        assert!(!rule("p", ".*", MatchMode::Partial).matches_path(&dir));
        assert!(!rule("f", ".*", MatchMode::Full).matches_path(&dir));
    }

    #[test]
    fn match_one_rejects_zero_and_multiple() {
        let set = RuleSet::new(vec![
            rule("a", r"\.mp4$", MatchMode::Partial),
            rule("b", r"movie", MatchMode::Partial),
        ]);
        let td = tempdir().unwrap();
        let both = td.path().join("movie.mp4");
        fs::write(&both, b"x").unwrap();
        match set.match_one(&both) {
            Err(SluiceError::AmbiguousRules { names, .. }) => {
                assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }

        let neither = td.path().join("notes.txt");
        fs::write(&neither, b"x").unwrap();
        assert!(matches!(
            set.match_one(&neither),
            Err(SluiceError::NoRuleMatch(_))
        ));

        let one = td.path().join("clip.mp4");
        fs::write(&one, b"x").unwrap();
        assert_eq!(set.match_one(&one).unwrap().name, "a");
    }

    #[test]
    fn preview_uses_priority() {
        let mut low = RuleSpec {
            name: "low".into(),
            patterns: vec![r"\.mkv$".into()],
            target: "/low".into(),
            priority: 1,
            ..Default::default()
        };
        low.mode = MatchMode::Partial;
        let high = RuleSpec {
            name: "high".into(),
            patterns: vec![r"\.mkv$".into()],
            target: "/high".into(),
            priority: 5,
            ..Default::default()
        };
        let set = RuleSet::new(vec![
            Rule::compile(low).unwrap(),
            Rule::compile(high).unwrap(),
        ]);
        let td = tempdir().unwrap();
        let f = td.path().join("x.mkv");
        fs::write(&f, b"x").unwrap();
        let (r, dest) = set.preview(&f).unwrap();
        assert_eq!(r.name, "high");
        assert_eq!(dest, PathBuf::from("/high/x.mkv"));
    }
}
