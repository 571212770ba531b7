//! Exclusion patterns for source roots
//!
//! Patterns are globs matched against a path relative to its source root,
//! using `/` as separator on every platform:
//!
//! - `*` matches within one path segment, `?` one character of a segment
//! - `**` matches across segments
//! - a trailing `/` excludes the directory and everything beneath it

use std::path::Path;

use regex::Regex;

use super::ProjectError;

#[derive(Debug, Clone)]
struct CompiledPattern {
    source: String,
    regex: Regex,
}

/// Compiled, immutable set of exclusion globs
#[derive(Debug, Clone, Default)]
pub struct ExclusionPatterns {
    patterns: Vec<CompiledPattern>,
}

impl ExclusionPatterns {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new<I, S>(patterns: I) -> Result<Self, ProjectError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| compile(pattern.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Source text of each pattern
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|pattern| pattern.source.as_str())
    }

    /// Whether a root-relative path is excluded
    pub fn is_excluded(&self, relative: &Path) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let normalized = normalize(relative);
        self.patterns
            .iter()
            .any(|pattern| pattern.regex.is_match(&normalized))
    }
}

fn normalize(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn compile(pattern: &str) -> Result<CompiledPattern, ProjectError> {
    let trimmed = pattern.trim().trim_start_matches("./");
    if trimmed.is_empty() {
        return Err(ProjectError::invalid_exclusion(pattern, "empty pattern"));
    }

    let (body, whole_directory) = match trimmed.strip_suffix('/') {
        Some(body) => (body, true),
        None => (trimmed, false),
    };

    let mut regex = String::from("^");
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                // "**/" also matches zero directories
                if chars.peek() == Some(&'/') {
                    chars.next();
                    regex.push_str("(?:.*/)?");
                } else {
                    regex.push_str(".*");
                }
            }
            '*' => regex.push_str("[^/]*"),
            '?' => regex.push_str("[^/]"),
            other => regex.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }
    if whole_directory {
        regex.push_str("(?:/.*)?");
    }
    regex.push('$');

    let regex = Regex::new(&regex)
        .map_err(|err| ProjectError::invalid_exclusion(pattern, err.to_string()))?;
    Ok(CompiledPattern {
        source: pattern.to_string(),
        regex,
    })
}
