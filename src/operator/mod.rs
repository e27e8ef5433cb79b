//! Operator chains.
//!
//! A chain is an ordered list of steps built from a closed set of kinds.
//! Transforming steps consume the current path and produce a new one;
//! stateful steps additionally read the ordered history of paths produced so
//! far in this invocation. Composite operators (move-then-symlink,
//! tag-then-move) are plain step lists, not new types, so the executor stays
//! single and recursion-free.
//!
//! Execution guards run once before the first step: source and destination
//! must differ, the destination must not already exist (unless duplicate
//! deletion is configured, which deletes first and records the event), and
//! the destination's parent directories are created with the configured dir
//! mode. Any unrecoverable step failure aborts the remaining chain; the file
//! stays wherever it got to, and nothing is retried automatically.

mod fsutil;
mod tool;

pub use fsutil::{check_disk_space, copy_path, entry_size, move_path, remove_path, unique_destination};
pub use tool::{ToolOutcome, parse_stdout, run_tool};

use anyhow::{Context, Result, bail};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::errors::SluiceError;
use crate::events::{AuditEvent, AuditSink};
use crate::platform;
use crate::template::TargetTemplate;

/// One step in an operator chain.
#[derive(Debug, Clone)]
pub enum Step {
    /// Move current path to the planned destination; produces the destination.
    Move,
    /// Copy current path to the planned destination; produces the copy.
    Copy,
    /// Create a symlink at the planned destination pointing at the current
    /// path; the file itself stays put. Produces the link path.
    Symlink,
    /// Stateful: create a symlink at the original source (history[0])
    /// pointing at the current path. Produces the current path unchanged.
    LinkBack,
    /// Run an external tagging tool on the current path. Produces the tool's
    /// reported output location, or falls back to `untagged` when skipped.
    Tool {
        program: String,
        args: Vec<String>,
        untagged: Option<TargetTemplate>,
    },
    /// Stateful: recompute content hashes of two history entries and fail the
    /// chain if they differ.
    ValidateHash { left: usize, right: usize },
    /// Stateful: delete the history entry at `index`. Deletion failure is
    /// logged and the chain continues.
    DeleteAt { index: usize },
    Noop,
}

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Step::Move => "move",
            Step::Copy => "copy",
            Step::Symlink => "symlink",
            Step::LinkBack => "link_back",
            Step::Tool { .. } => "tool",
            Step::ValidateHash { .. } => "validate_hash",
            Step::DeleteAt { .. } => "delete_at",
            Step::Noop => "noop",
        }
    }
}

/// A rule's configured operator: the step list plus post-chain behavior.
#[derive(Debug, Clone, Default)]
pub struct OperatorSpec {
    pub name: String,
    pub steps: Vec<Step>,
    /// Apply configured file/dir modes to the final path after success.
    pub set_permissions: bool,
}

impl OperatorSpec {
    /// Built-in operator names as accepted in configuration.
    pub fn builtin(name: &str) -> Result<Self> {
        let steps = match name {
            "move" | "" => vec![Step::Move],
            "copy" => vec![Step::Copy],
            "symlink" => vec![Step::Symlink],
            "move-symlink" => vec![Step::Move, Step::LinkBack],
            "noop" => vec![Step::Noop],
            other => bail!("unknown operator '{other}'"),
        };
        Ok(Self {
            name: if name.is_empty() { "move".into() } else { name.into() },
            steps,
            set_permissions: false,
        })
    }

    /// Tagging operator: copy to the destination area, verify the copy, run
    /// the tool on it, then discard the original.
    pub fn tagging(
        program: String,
        args: Vec<String>,
        untagged: Option<TargetTemplate>,
    ) -> Self {
        Self {
            name: "tag".into(),
            steps: vec![
                Step::Copy,
                Step::ValidateHash { left: 0, right: 1 },
                Step::Tool {
                    program,
                    args,
                    untagged,
                },
                Step::DeleteAt { index: 0 },
            ],
            set_permissions: false,
        }
    }
}

/// Everything a chain invocation needs besides the paths.
pub struct ChainCtx<'a> {
    pub sink: &'a dyn AuditSink,
    pub delete_duplicates: bool,
    pub file_mode: Option<u32>,
    pub dir_mode: Option<u32>,
}

/// Execute `spec` moving `from` toward the planned destination `to`.
/// Returns the final produced path.
pub fn execute(spec: &OperatorSpec, from: &Path, to: &Path, ctx: &ChainCtx) -> Result<PathBuf> {
    guard(from, to, ctx)?;

    let mut history: Vec<PathBuf> = vec![from.to_path_buf()];
    let mut current = from.to_path_buf();

    for step in &spec.steps {
        debug!(step = step.name(), current = %current.display(), "chain step");
        current = apply(step, &current, to, &mut history, ctx)
            .with_context(|| format!("operator '{}' step '{}'", spec.name, step.name()))?;
        history.push(current.clone());
    }

    if spec.set_permissions {
        platform::apply_modes_recursive(&current, ctx.file_mode, ctx.dir_mode)
            .with_context(|| format!("applying permissions to {}", current.display()))?;
    }
    Ok(current)
}

fn guard(from: &Path, to: &Path, ctx: &ChainCtx) -> Result<()> {
    if from == to {
        bail!("source and destination are the same path: {}", from.display());
    }
    if to.exists() {
        if !ctx.delete_duplicates {
            return Err(SluiceError::DestinationExists(to.to_path_buf()).into());
        }
        // Abort before any move when deletion fails partway; moving into a
        // half-deleted tree would merge old and new content.
        remove_path(to)
            .with_context(|| format!("failed to delete existing destination {}", to.display()))?;
        ctx.sink.record(&AuditEvent::DuplicateDeleted {
            path: to.to_path_buf(),
        });
        info!(path = %to.display(), "deleted existing destination before move");
    }
    if let Some(parent) = to.parent() {
        create_parents_with_mode(parent, ctx.dir_mode)?;
    }
    Ok(())
}

/// Create missing parent directories, applying `dir_mode` only to the ones we
/// actually create.
fn create_parents_with_mode(parent: &Path, dir_mode: Option<u32>) -> Result<()> {
    let mut missing: Vec<PathBuf> = Vec::new();
    let mut cursor = Some(parent);
    while let Some(p) = cursor {
        if p.exists() || p.as_os_str().is_empty() {
            break;
        }
        missing.push(p.to_path_buf());
        cursor = p.parent();
    }
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create destination dir {}", parent.display()))?;
    if let Some(mode) = dir_mode {
        for dir in missing {
            if let Err(e) = platform::set_mode(&dir, mode) {
                warn!(path = %dir.display(), error = %e, "could not set mode on created dir");
            }
        }
    }
    Ok(())
}

fn apply(
    step: &Step,
    current: &Path,
    to: &Path,
    history: &mut Vec<PathBuf>,
    _ctx: &ChainCtx,
) -> Result<PathBuf> {
    match step {
        Step::Noop => Ok(current.to_path_buf()),
        Step::Move => {
            move_path(current, to)?;
            Ok(to.to_path_buf())
        }
        Step::Copy => {
            copy_path(current, to)?;
            Ok(to.to_path_buf())
        }
        Step::Symlink => {
            platform::symlink(current, to).with_context(|| {
                format!("symlink {} -> {}", to.display(), current.display())
            })?;
            Ok(to.to_path_buf())
        }
        Step::LinkBack => {
            let origin = &history[0];
            platform::symlink(current, origin).with_context(|| {
                format!("symlink {} -> {}", origin.display(), current.display())
            })?;
            Ok(current.to_path_buf())
        }
        Step::Tool {
            program,
            args,
            untagged,
        } => match run_tool(program, args, current)? {
            ToolOutcome::MovedTo(reported) => Ok(reported),
            ToolOutcome::Processed => Ok(current.to_path_buf()),
            ToolOutcome::Skipped => match untagged {
                Some(tpl) => {
                    let name = current
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    // The untagged bin accumulates; never clobber an earlier
                    // skip with the same name.
                    let fallback = unique_destination(&tpl.resolve(&name));
                    if let Some(parent) = fallback.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    move_path(current, &fallback)?;
                    info!(from = %current.display(), to = %fallback.display(), "tool skipped; moved to untagged target");
                    Ok(fallback)
                }
                None => {
                    info!(path = %current.display(), "tool skipped; leaving file in place");
                    Ok(current.to_path_buf())
                }
            },
        },
        Step::ValidateHash { left, right } => {
            let (a, b) = (history_path(history, *left)?, history_path(history, *right)?);
            if file_hash(&a)? != file_hash(&b)? {
                return Err(SluiceError::HashMismatch { left: a, right: b }.into());
            }
            Ok(current.to_path_buf())
        }
        Step::DeleteAt { index } => {
            match history_path(history, *index) {
                Ok(victim) => {
                    if let Err(e) = remove_path(&victim) {
                        warn!(path = %victim.display(), error = %e, "indexed deletion failed; continuing chain");
                    }
                }
                Err(e) => warn!(error = %e, "indexed deletion skipped; continuing chain"),
            }
            Ok(current.to_path_buf())
        }
    }
}

/// A stateful step may only reference previously produced paths.
fn history_path(history: &[PathBuf], index: usize) -> Result<PathBuf> {
    history
        .get(index)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("history index {index} out of range ({} entries)", history.len()))
}

/// Sha256 of a file's content.
pub fn file_hash(path: &Path) -> Result<[u8; 32]> {
    let mut file = fs::File::open(path)
        .with_context(|| format!("cannot open {} for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}
