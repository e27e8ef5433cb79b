//! External tool invocation (tagging/organizing programs).
//!
//! The tool is run as a subprocess with the current path plus configured
//! flags. Its stdout is parsed for a "moved/renamed to: X" line, because the
//! tool may relocate the file beyond the planned destination; a "skipped"
//! line means the tool declined the file. Non-zero exit aborts the step.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

use crate::errors::SluiceError;

/// Outcome reported by the tool through its stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    /// Tool processed the file and reported its final location.
    MovedTo(PathBuf),
    /// Tool processed the file in place (no move line found).
    Processed,
    /// Tool declined the file.
    Skipped,
}

/// Run `program args... <path>` and interpret its output.
pub fn run_tool(program: &str, args: &[String], path: &Path) -> Result<ToolOutcome> {
    let output = Command::new(program)
        .args(args)
        .arg(path)
        .output()
        .map_err(|e| SluiceError::ToolFailed {
            program: program.to_string(),
            detail: format!("failed to launch: {e}"),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        let detail = if stderr.trim().is_empty() {
            format!("exit status {}", output.status)
        } else {
            format!("exit status {}: {}", output.status, stderr.trim())
        };
        return Err(SluiceError::ToolFailed {
            program: program.to_string(),
            detail,
        }
        .into());
    }
    if !stderr.trim().is_empty() {
        warn!(program, stderr = %stderr.trim(), "tool wrote to stderr");
    }

    Ok(parse_stdout(&stdout))
}

/// Find the tool's self-reported result in its stdout.
pub fn parse_stdout(stdout: &str) -> ToolOutcome {
    for line in stdout.lines() {
        let line = line.trim();
        let lower = line.to_ascii_lowercase();
        if lower.starts_with("skipped") {
            return ToolOutcome::Skipped;
        }
        for prefix in ["moved to:", "renamed to:"] {
            if let Some(rest) = lower.strip_prefix(prefix) {
                // Take the path from the original line to preserve case.
                let reported = line[line.len() - rest.len()..].trim();
                if !reported.is_empty() {
                    debug!(reported, "tool reported output location");
                    return ToolOutcome::MovedTo(PathBuf::from(reported));
                }
            }
        }
    }
    ToolOutcome::Processed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_moved_to_line() {
        let out = "scanning...\nMoved to: /media/TV/Show/ep.mkv\ndone\n";
        assert_eq!(
            parse_stdout(out),
            ToolOutcome::MovedTo(PathBuf::from("/media/TV/Show/ep.mkv"))
        );
    }

    #[test]
    fn parses_renamed_to_line_case_insensitive() {
        let out = "RENAMED TO: /x/Y.mkv";
        assert_eq!(
            parse_stdout(out),
            ToolOutcome::MovedTo(PathBuf::from("/x/Y.mkv"))
        );
    }

    #[test]
    fn skipped_wins_over_nothing() {
        assert_eq!(parse_stdout("Skipped: already tagged\n"), ToolOutcome::Skipped);
    }

    #[test]
    fn plain_output_means_processed_in_place() {
        assert_eq!(parse_stdout("all good\n"), ToolOutcome::Processed);
    }

    #[cfg(unix)]
    #[test]
    fn run_tool_nonzero_exit_is_error() {
        let err = run_tool("false", &[], Path::new("/tmp/x")).unwrap_err();
        let tool = err.downcast_ref::<SluiceError>().unwrap();
        assert_eq!(tool.code(), "tool_failed");
    }

    #[cfg(unix)]
    #[test]
    fn run_tool_captures_stdout() {
        let out = run_tool(
            "echo",
            &["moved to: /somewhere/else.mkv".to_string()],
            Path::new("ignored"),
        )
        .unwrap();
        match out {
            ToolOutcome::MovedTo(p) => {
                assert!(p.to_string_lossy().starts_with("/somewhere/else.mkv"))
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
