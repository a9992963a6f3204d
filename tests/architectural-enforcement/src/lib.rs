//! Architectural Enforcement Integration Tests
//!
//! This package contains static checks that enforce architectural principles:
//! - No sleep() calls in production code (the scheduler imposes no
//!   suspension points of its own; waiting is always on a token or channel)
//! - No blocking std::thread parking in async code
//!
//! These tests are designed to catch violations early in the development cycle.
//! The workspace-wide checks live in `tests/`; this library holds the scanner.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Source trees that count as production code
pub const PRODUCTION_ROOTS: &[&str] = &["conductor/core/src", "conductor/cli/src"];

/// Patterns that must not appear in production code
pub const FORBIDDEN_PATTERNS: &[&str] = &["sleep(", "std::thread::park"];

/// A forbidden pattern found in a source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the pattern
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The matched pattern
    pub pattern: &'static str,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: `{}`", self.path.display(), self.line, self.pattern)
    }
}

/// Workspace root, two levels above this crate
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// Tracks the extent of one `#[cfg(test)]`-gated item
///
/// The item ends where its braces balance again, or at the `;` of a
/// brace-less item such as `mod tests;`. Braces inside string literals are
/// counted too, which is good enough for test modules.
#[derive(Debug, Default)]
struct GatedItem {
    depth: usize,
    opened: bool,
}

impl GatedItem {
    /// Feed the next line of the item; returns true once the item is over
    fn consume(&mut self, line: &str) -> bool {
        for ch in line.chars() {
            match ch {
                '{' => {
                    self.depth += 1;
                    self.opened = true;
                }
                '}' => self.depth = self.depth.saturating_sub(1),
                ';' if !self.opened => return true,
                _ => {}
            }
        }
        self.opened && self.depth == 0
    }
}

/// Scan production source text for forbidden patterns
///
/// Items gated by `#[cfg(test)]` are test code and are skipped, as are
/// comment lines. Code after a gated item is scanned again.
#[must_use]
pub fn scan_source(path: &Path, source: &str) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut gated: Option<GatedItem> = None;

    for (index, line) in source.lines().enumerate() {
        let trimmed = line.trim_start();
        if let Some(item) = gated.as_mut() {
            if item.consume(line) {
                gated = None;
            }
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("#[cfg(test)]") {
            let mut item = GatedItem::default();
            if !item.consume(rest) {
                gated = Some(item);
            }
            continue;
        }
        if trimmed.starts_with("//") {
            continue;
        }
        for pattern in FORBIDDEN_PATTERNS {
            if line.contains(pattern) {
                violations.push(Violation {
                    path: path.to_path_buf(),
                    line: index + 1,
                    pattern,
                });
            }
        }
    }
    violations
}

/// Scan every `.rs` file under the production roots
#[must_use]
pub fn scan_workspace(root: &Path) -> Vec<Violation> {
    PRODUCTION_ROOTS
        .iter()
        .flat_map(|dir| WalkDir::new(root.join(dir)).into_iter())
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "rs"))
        .flat_map(|entry| {
            let source = fs::read_to_string(entry.path()).unwrap_or_default();
            scan_source(entry.path(), &source)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scanner_detects_sleep() {
        let source = "async fn f() {\n    tokio::time::sleep(d).await;\n}\n";
        let violations = scan_source(Path::new("f.rs"), source);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].line, 2);
        assert_eq!(violations[0].pattern, "sleep(");
    }

    #[test]
    fn test_scanner_skips_comments_and_tests() {
        let source = "// sleep(1) is banned\nfn f() {}\n#[cfg(test)]\nmod tests { fn g() { sleep(1); } }\n";
        assert!(scan_source(Path::new("f.rs"), source).is_empty());
    }

    #[test]
    fn test_scanner_resumes_after_gated_item() {
        let source = "\
#[cfg(test)]
fn helper() {
    if true {
        std::thread::sleep(d);
    }
}

fn production() {
    std::thread::sleep(d);
}
";
        let violations = scan_source(Path::new("f.rs"), source);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].line, 9);
    }

    #[test]
    fn test_scanner_skips_braceless_gated_items() {
        let source = "#[cfg(test)]\nmod tests;\n#[cfg(test)] use std::thread::sleep;\nfn f() { sleep(d); }\n";
        let violations = scan_source(Path::new("f.rs"), source);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].line, 4);
    }

    #[test]
    fn test_scanner_skips_attributes_between_gate_and_item() {
        let source = "#[cfg(test)]\n#[allow(dead_code)]\nmod tests {\n    fn g() { sleep(1); }\n}\nfn f() {}\n";
        assert!(scan_source(Path::new("f.rs"), source).is_empty());
    }
}
