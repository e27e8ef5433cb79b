//! Core library for `sluice`.
//!
//! Watches directories for newly-arrived files, waits until each file has
//! stopped being written, classifies it against configured rules, resolves a
//! destination from the rule's target template, and executes the rule's
//! operator chain (move/copy/symlink/tag/validate/delete). An optional sync
//! engine pulls new files down from remote servers first, deduplicated
//! through a persisted ledger, and feeds them into the same pipeline.
//!
//! Keep the library ergonomic: a Config type with sensible defaults, small
//! components with explicit ownership, and pure helpers where possible.

pub mod app;
pub mod cli;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod logging;
pub mod operator;
pub mod output;
pub mod platform;
pub mod route;
pub mod rules;
pub mod shutdown;
pub mod stability;
pub mod sync;
pub mod template;
pub mod watch;

pub use config::types::{Config, LogLevel};
pub use errors::SluiceError;
pub use events::{AuditEvent, AuditSink, TracingSink};
pub use rules::{MatchMode, Rule, RuleSet};
pub use template::TargetTemplate;
