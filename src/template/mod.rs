//! Target templates.
//!
//! A template describes a destination directory as an ordered sequence of
//! segments: literal text, `$FORMAT$` date tokens, and
//! `%PATTERN%REPLACEMENT%` regex capture tokens. Templates are parsed once at
//! configuration load (failing fast on malformed tokens) and resolved per
//! file; resolution is stateless and re-entrant.
//!
//! Resolution applies each token left-to-right against the file name being
//! placed, concatenates the results, then appends the file name itself. A
//! capture token whose pattern does not match resolves to an empty segment so
//! templates can carry optional path components.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use regex::{Regex, RegexBuilder};
use std::path::PathBuf;

/// File name used to exercise a template once at parse time.
const PROBE_NAME: &str = "example.file.txt";

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    /// chrono format string, already translated from the y/M/d letter runs.
    Date(String),
    Capture { pattern: Regex, replacement: String },
}

/// A parsed destination template.
#[derive(Debug, Clone)]
pub struct TargetTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl TargetTemplate {
    /// Parse and validate a template string.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            bail!("target template must not be empty");
        }
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '$' => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    let token = take_until(&mut chars, '$').with_context(|| {
                        format!("unterminated date token in template '{raw}'")
                    })?;
                    let fmt = translate_date_format(&token)
                        .with_context(|| format!("bad date token '${token}$' in template '{raw}'"))?;
                    segments.push(Segment::Date(fmt));
                }
                '%' => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    let pattern = take_until(&mut chars, '%').with_context(|| {
                        format!("unterminated capture pattern in template '{raw}'")
                    })?;
                    let replacement = take_until(&mut chars, '%').with_context(|| {
                        format!("capture token missing replacement in template '{raw}'")
                    })?;
                    let re = RegexBuilder::new(&pattern)
                        .case_insensitive(true)
                        .build()
                        .with_context(|| {
                            format!("invalid capture pattern '%{pattern}%' in template '{raw}'")
                        })?;
                    segments.push(Segment::Capture {
                        pattern: re,
                        replacement,
                    });
                }
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        let tpl = Self {
            raw: raw.to_string(),
            segments,
        };
        // Exercise once against a representative name so malformed replacement
        // syntax surfaces at configuration load, not mid-move.
        let _ = tpl.resolve(PROBE_NAME);
        Ok(tpl)
    }

    /// The original template text (for logs and preview output).
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Resolve the destination for `filename` against the current time.
    pub fn resolve(&self, filename: &str) -> PathBuf {
        self.resolve_at(filename, Local::now())
    }

    /// Resolve with an explicit timestamp (testable).
    pub fn resolve_at(&self, filename: &str, now: DateTime<Local>) -> PathBuf {
        let mut dir = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => dir.push_str(s),
                Segment::Date(fmt) => {
                    dir.push_str(&now.format(fmt).to_string());
                }
                Segment::Capture {
                    pattern,
                    replacement,
                } => {
                    if let Some(caps) = pattern.captures(filename) {
                        let mut out = String::new();
                        caps.expand(replacement, &mut out);
                        dir.push_str(&out);
                    }
                    // No match: optional component, resolves to nothing.
                }
            }
        }
        PathBuf::from(dir).join(filename)
    }
}

fn take_until(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, end: char) -> Option<String> {
    let mut out = String::new();
    for c in chars.by_ref() {
        if c == end {
            return Some(out);
        }
        out.push(c);
    }
    None
}

/// Translate letter-run date tokens (yyyy, MM, dd, HH, mm, ss, ...) into a
/// chrono format string. Non-letter characters pass through verbatim.
fn translate_date_format(token: &str) -> Result<String> {
    let mut out = String::new();
    let bytes: Vec<char> = token.chars().collect();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if !c.is_ascii_alphabetic() {
            out.push(c);
            i += 1;
            continue;
        }
        let mut run = 1;
        while i + run < bytes.len() && bytes[i + run] == c {
            run += 1;
        }
        let spec = match (c, run) {
            ('y', 4) => "%Y",
            ('y', 2) => "%y",
            ('M', 4) => "%B",
            ('M', 3) => "%b",
            ('M', 2) => "%m",
            ('d', 2) => "%d",
            ('H', 2) => "%H",
            ('m', 2) => "%M",
            ('s', 2) => "%S",
            _ => bail!("unsupported date token run '{}'", c.to_string().repeat(run)),
        };
        out.push_str(spec);
        i += run;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_2024() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 12, 30, 45).unwrap()
    }

    #[test]
    fn literal_only_appends_filename() {
        let tpl = TargetTemplate::parse("/tv/archive").unwrap();
        let dest = tpl.resolve("show.mkv");
        assert_eq!(dest, PathBuf::from("/tv/archive/show.mkv"));
    }

    #[test]
    fn date_token_embeds_year() {
        let tpl = TargetTemplate::parse("/tv/$yyyy$").unwrap();
        let dest = tpl.resolve_at("show.mkv", at_2024());
        assert_eq!(dest, PathBuf::from("/tv/2024/show.mkv"));
    }

    #[test]
    fn date_token_mixed_runs() {
        let tpl = TargetTemplate::parse("/log/$yyyy-MM-dd$").unwrap();
        let dest = tpl.resolve_at("a.log", at_2024());
        assert_eq!(dest, PathBuf::from("/log/2024-03-09/a.log"));
    }

    #[test]
    fn capture_token_substitutes_group() {
        let tpl = TargetTemplate::parse("/tv/%^(\\w+)\\.s(\\d+).*$%$1/season $2%").unwrap();
        let dest = tpl.resolve("show.s01e02.mkv");
        assert_eq!(dest, PathBuf::from("/tv/show/season 01/show.s01e02.mkv"));
    }

    #[test]
    fn capture_token_without_match_is_empty() {
        let tpl = TargetTemplate::parse("/media%^(\\d{8})%/$1%").unwrap();
        let dest = tpl.resolve("no-digits.bin");
        assert_eq!(dest, PathBuf::from("/media/no-digits.bin"));
    }

    #[test]
    fn consecutive_resolves_agree_without_rollover() {
        let tpl = TargetTemplate::parse("/tv/$yyyy$").unwrap();
        let a = tpl.resolve("x.mkv");
        let b = tpl.resolve("x.mkv");
        assert_eq!(a, b);
    }

    #[test]
    fn unterminated_date_token_fails() {
        assert!(TargetTemplate::parse("/tv/$yyyy").is_err());
    }

    #[test]
    fn invalid_capture_pattern_fails_fast() {
        assert!(TargetTemplate::parse("/tv/%([unclosed%$1%").is_err());
    }

    #[test]
    fn empty_template_rejected() {
        assert!(TargetTemplate::parse("").is_err());
    }
}
