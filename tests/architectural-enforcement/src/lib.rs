//! Architectural Enforcement
//!
//! Source scans that keep the relay's production code in line with its
//! architectural rules:
//! - No sleep() calls outside test helpers
//! - No blocking I/O on the async path
//! - No unwrap()/expect() panics in production code
//!
//! The scans work on source text, line by line. Comments and `#[cfg(test)]`
//! items are not production code and are skipped.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Production source roots, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["relay/core/src", "relay/daemon/src"];

/// Workspace root, resolved from this crate's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// One production line of a source file
#[derive(Debug, Clone, Copy)]
pub struct SourceLine<'a> {
    /// 1-based line number
    pub number: usize,
    /// The line with any trailing comment removed
    pub code: &'a str,
    /// The full line
    pub raw: &'a str,
}

/// A Rust source file under one of the production roots
#[derive(Debug)]
pub struct SourceFile {
    /// Path relative to the workspace root, with `/` separators
    pub relative_path: String,
    content: String,
}

impl SourceFile {
    /// Build from in-memory content
    pub fn new(relative_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            content: content.into(),
        }
    }

    /// Whether the file path ends with `suffix`
    #[must_use]
    pub fn is(&self, suffix: &str) -> bool {
        self.relative_path.ends_with(suffix)
    }

    /// Lines that are compiled into production builds
    ///
    /// Skips comment-only lines and any item annotated with `#[cfg(test)]`.
    #[must_use]
    pub fn production_lines(&self) -> Vec<SourceLine<'_>> {
        let mut lines = Vec::new();
        let mut skip = TestItemSkip::default();

        for (idx, raw) in self.content.lines().enumerate() {
            let code = strip_comment(raw);
            if skip.consume(code) {
                continue;
            }
            if code.trim().is_empty() {
                continue;
            }
            lines.push(SourceLine {
                number: idx + 1,
                code,
                raw,
            });
        }
        lines
    }
}

/// Tracks whether the scanner is inside a `#[cfg(test)]` item
#[derive(Default)]
struct TestItemSkip {
    pending: bool,
    depth: usize,
    entered: bool,
}

impl TestItemSkip {
    /// Feed one line; returns `true` if the line belongs to a test item
    fn consume(&mut self, code: &str) -> bool {
        let trimmed = code.trim();

        if !self.pending {
            if trimmed.starts_with("#[cfg(test)]") {
                self.pending = true;
                self.depth = 0;
                self.entered = false;
                return true;
            }
            return false;
        }

        for c in trimmed.chars() {
            match c {
                '{' => {
                    self.depth += 1;
                    self.entered = true;
                }
                '}' => self.depth = self.depth.saturating_sub(1),
                _ => {}
            }
        }

        let item_ended = if self.entered {
            self.depth == 0
        } else {
            // `#[cfg(test)] mod tests;` or a single `use`
            trimmed.ends_with(';')
        };
        if item_ended {
            self.pending = false;
        }
        true
    }
}

/// Drop a trailing `//` comment
///
/// Naive about `//` inside string literals, which only hides code from the
/// scan and never produces a false violation.
fn strip_comment(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Every `.rs` file under the production roots, sorted by path
#[must_use]
pub fn production_files() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&path)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            let relative = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            files.push(SourceFile::new(relative, content));
        }
    }
    files
}

/// A rule violation at one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File path relative to the workspace root
    pub path: String,
    /// 1-based line number
    pub line_number: usize,
    /// What rule was broken
    pub kind: &'static str,
    /// The offending line, trimmed
    pub line: String,
}

impl Violation {
    /// Record a violation for `line` in `file`
    #[must_use]
    pub fn at(file: &SourceFile, line: &SourceLine<'_>, kind: &'static str) -> Self {
        Self {
            path: file.relative_path.clone(),
            line_number: line.number,
            kind,
            line: line.raw.trim().to_string(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path, self.line_number, self.kind, self.line
        )
    }
}

/// Print violations and fail the test if there are any
///
/// # Panics
///
/// Panics when `violations` is not empty.
pub fn report(rule: &str, violations: &[Violation], hints: &[&str]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {rule}: violations found in production code\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    if !hints.is_empty() {
        eprintln!();
        for hint in hints {
            eprintln!("  {hint}");
        }
    }

    panic!(
        "\nFound {} violation(s) of '{rule}'.\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skips_cfg_test_module() {
        let file = SourceFile::new(
            "relay/core/src/example.rs",
            "fn real() -> u8 {\n    1\n}\n\n#[cfg(test)]\nmod tests {\n    fn helper() {\n        x.unwrap();\n    }\n}\n\nfn after() {}\n",
        );

        let numbers: Vec<usize> = file.production_lines().iter().map(|l| l.number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 12]);
    }

    #[test]
    fn test_skips_cfg_test_declaration() {
        let file = SourceFile::new(
            "relay/core/src/lib.rs",
            "#[cfg(test)]\nmod tests;\npub mod config;\n",
        );

        let lines = file.production_lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].code, "pub mod config;");
    }

    #[test]
    fn test_strips_comments() {
        let file = SourceFile::new(
            "relay/core/src/a.rs",
            "//! module docs\n/// item docs\nlet x = 1; // trailing\n",
        );

        let lines = file.production_lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].code, "let x = 1; ");
        assert_eq!(lines[0].number, 3);
    }

    #[test]
    fn test_violation_display() {
        let file = SourceFile::new("relay/daemon/src/server.rs", "    foo.unwrap();\n");
        let lines = file.production_lines();
        let violation = Violation::at(&file, &lines[0], "unwrap");

        assert_eq!(
            violation.to_string(),
            "relay/daemon/src/server.rs:1 - unwrap: foo.unwrap();"
        );
    }

    #[test]
    fn test_finds_production_sources() {
        let files = production_files();
        assert!(files.iter().any(|f| f.is("relay/core/src/lib.rs")));
        assert!(files.iter().any(|f| f.is("relay/daemon/src/server.rs")));
    }
}
