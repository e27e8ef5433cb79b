//! Routing: from a stable path to an enqueued move.
//!
//! The router is the glue between the stability tracker and the dispatcher.
//! It demands exactly one matching rule; zero or several matches leave the
//! path untouched in the watch directory and emit an audit error, so an
//! operator can fix the rule set and re-trigger.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::dispatch::{Dispatcher, PendingMove};
use crate::events::{AuditEvent, SharedSink};
use crate::operator::OperatorSpec;
use crate::rules::RuleSet;

pub struct Router {
    rules: RuleSet,
    dispatcher: Arc<Dispatcher>,
    sink: SharedSink,
}

impl Router {
    pub fn new(rules: RuleSet, dispatcher: Arc<Dispatcher>, sink: SharedSink) -> Self {
        Self {
            rules,
            dispatcher,
            sink,
        }
    }

    /// Classify `path` and enqueue its move. Match failures are audited and
    /// otherwise ignored; the file stays where it is.
    pub fn route(&self, path: PathBuf) {
        let rule = match self.rules.match_one(&path) {
            Ok(rule) => rule,
            Err(e) => {
                warn!(code = e.code(), path = %path.display(), error = %e, "cannot route path");
                self.sink.record(&AuditEvent::Error {
                    scope: "route",
                    path: Some(path),
                    detail: e.to_string(),
                });
                return;
            }
        };
        let to = rule.destination(&path);
        info!(rule = %rule.name, template = rule.template.raw(), from = %path.display(), to = %to.display(), "routed");
        self.dispatcher.submit(PendingMove {
            from: path,
            to,
            operator: Arc::new(rule.operator.clone()),
            rule: rule.name.clone(),
        });
    }
}

/// Dry-run classification for the preview surface: highest-priority match
/// and its destination, no side effects.
pub fn preview(rules: &RuleSet, path: &Path) -> Option<(String, PathBuf)> {
    rules
        .preview(path)
        .map(|(rule, dest)| (rule.name.clone(), dest))
}

/// The operator a previewed rule would run, for display.
pub fn preview_operator<'a>(rules: &'a RuleSet, path: &Path) -> Option<&'a OperatorSpec> {
    rules.preview(path).map(|(rule, _)| &rule.operator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{DispatchSettings, ShutdownMode};
    use crate::events::TracingSink;
    use crate::rules::{MatchMode, Rule, RuleSpec};
    use std::fs;
    use tempfile::tempdir;

    fn ruleset(td: &Path) -> RuleSet {
        RuleSet::new(vec![
            Rule::compile(RuleSpec {
                name: "txt".into(),
                patterns: vec![r"\.txt$".into()],
                target: td.join("out").to_string_lossy().into_owned(),
                mode: MatchMode::Partial,
                operator: OperatorSpec::builtin("move").unwrap(),
                ..Default::default()
            })
            .unwrap(),
        ])
    }

    #[test]
    fn matched_path_is_moved() {
        let td = tempdir().unwrap();
        let src = td.path().join("note.txt");
        fs::write(&src, b"x").unwrap();

        let d = Dispatcher::start(DispatchSettings::default(), Arc::new(TracingSink), None);
        let router = Router::new(ruleset(td.path()), Arc::clone(&d), Arc::new(TracingSink));
        router.route(src.clone());
        d.shutdown(ShutdownMode::Drain);
        assert!(td.path().join("out/note.txt").exists());
        assert!(!src.exists());
    }

    #[test]
    fn unmatched_path_stays_put() {
        let td = tempdir().unwrap();
        let src = td.path().join("movie.mkv");
        fs::write(&src, b"x").unwrap();

        let d = Dispatcher::start(DispatchSettings::default(), Arc::new(TracingSink), None);
        let router = Router::new(ruleset(td.path()), Arc::clone(&d), Arc::new(TracingSink));
        router.route(src.clone());
        d.shutdown(ShutdownMode::Drain);
        assert!(src.exists(), "no rule matched; file untouched");
    }

    #[test]
    fn preview_reports_without_moving() {
        let td = tempdir().unwrap();
        let src = td.path().join("note.txt");
        fs::write(&src, b"x").unwrap();

        let rules = ruleset(td.path());
        let (name, dest) = preview(&rules, &src).unwrap();
        assert_eq!(name, "txt");
        assert_eq!(dest, td.path().join("out/note.txt"));
        assert!(src.exists());
        assert!(preview(&rules, Path::new("/nope.mkv")).is_none());
    }
}
