//! Work file parsing.
//!
//! A work file is plain text. The first [`HEADER_LINES`] lines are reserved
//! metadata; the first [`MARKS_LINES`] of those are copied verbatim into the
//! marks file. Every following non-blank line names one source document,
//! wrapped as `(<path>) <token>`.

use std::path::{PathBuf, MAIN_SEPARATOR};
use std::sync::LazyLock;

use regex::Regex;

use super::log::JobLog;

/// Number of leading lines that never name a source document.
pub const HEADER_LINES: usize = 8;

/// Number of leading lines copied into the marks file.
pub const MARKS_LINES: usize = 2;

static WRAPPED_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    // "(path) token" with an optional trailing run of whitespace
    Regex::new(r"^\((?P<path>.*)\)\s+\S+\s*$").expect("static pattern is valid")
});

/// A parsed work file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkFile {
    lines: Vec<String>,
}

impl WorkFile {
    /// Splits `content` into lines. Parsing never fails.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        Self {
            lines: content.lines().map(str::to_string).collect(),
        }
    }

    /// Lines written verbatim into the marks file.
    #[must_use]
    pub fn marks_header(&self) -> &[String] {
        &self.lines[..self.lines.len().min(MARKS_LINES)]
    }

    /// Source references in file order, unwrapped and separator-normalized.
    #[must_use]
    pub fn references(&self) -> Vec<PathBuf> {
        self.lines
            .iter()
            .skip(HEADER_LINES)
            .filter(|line| !line.trim().is_empty())
            .map(|line| normalize_separators(&strip_reference(line)))
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
            .collect()
    }
}

/// Removes the `(` ... `) <token>` wrapping from a reference line.
///
/// Lines that do not match the expected shape are stripped as far as
/// possible rather than rejected.
#[must_use]
pub fn strip_reference(line: &str) -> String {
    let line = line.trim();
    if let Some(caps) = WRAPPED_REFERENCE.captures(line) {
        return caps["path"].trim_start_matches('(').trim().to_string();
    }

    let line = line.trim_start_matches('(');
    let line = line.strip_suffix(')').unwrap_or(line);
    line.trim().to_string()
}

/// Rewrites both separator styles to the host convention.
#[must_use]
pub fn normalize_separators(path: &str) -> String {
    path.chars()
        .map(|c| if c == '/' || c == '\\' { MAIN_SEPARATOR } else { c })
        .collect()
}

/// Keeps the references that exist on disk, in their original order.
///
/// Each dropped reference is logged as a warning.
pub fn retain_existing(references: Vec<PathBuf>, log: &mut JobLog) -> Vec<PathBuf> {
    references
        .into_iter()
        .filter(|path| {
            if path.exists() {
                true
            } else {
                log.warning(format!(
                    "File {} doesn't exist. Removed from list!",
                    path.display()
                ));
                false
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Severity;
    use tempfile::TempDir;

    fn header() -> String {
        (1..=HEADER_LINES)
            .map(|i| format!("%header {i}\n"))
            .collect()
    }

    #[test]
    fn test_marks_header_is_first_two_lines() {
        let work = WorkFile::parse(&header());
        assert_eq!(work.marks_header(), ["%header 1", "%header 2"]);
    }

    #[test]
    fn test_marks_header_of_short_file() {
        let work = WorkFile::parse("only line\n");
        assert_eq!(work.marks_header(), ["only line"]);
        assert!(work.references().is_empty());
    }

    #[test]
    fn test_references_skip_header_and_blank_lines() {
        let content = format!("{}(/a.ps) prun\n\n   \n(/b.ps) prun\n", header());
        let refs = WorkFile::parse(&content).references();
        let expected: Vec<PathBuf> = ["/a.ps", "/b.ps"]
            .iter()
            .map(|p| PathBuf::from(normalize_separators(p)))
            .collect();
        assert_eq!(refs, expected);
    }

    #[test]
    fn test_header_lines_are_never_references() {
        let content = "(/x.ps) prun\n".repeat(HEADER_LINES);
        assert!(WorkFile::parse(&content).references().is_empty());
    }

    #[test]
    fn test_strip_reference_variants() {
        assert_eq!(strip_reference("(C:\\a.ps) prun"), "C:\\a.ps");
        assert_eq!(strip_reference("  (/spool/a b.ps) run  "), "/spool/a b.ps");
        assert_eq!(strip_reference("(/spool/a.ps)"), "/spool/a.ps");
        assert_eq!(strip_reference("/spool/a.ps"), "/spool/a.ps");
        assert_eq!(strip_reference("((/spool/a.ps) prun"), "/spool/a.ps");
    }

    #[test]
    fn test_normalize_separators() {
        let expected = format!("C:{MAIN_SEPARATOR}dir{MAIN_SEPARATOR}a.ps");
        assert_eq!(normalize_separators("C:\\dir/a.ps"), expected);
    }

    #[test]
    fn test_retain_existing_keeps_order_and_warns_per_missing() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.ps");
        let b = dir.path().join("b.ps");
        let c = dir.path().join("c.ps");
        for p in [&a, &b, &c] {
            std::fs::write(p, "%!PS").unwrap();
        }
        let missing1 = dir.path().join("missing1.ps");
        let missing2 = dir.path().join("missing2.ps");

        let mut log = JobLog::new("job.ps");
        let kept = retain_existing(
            vec![
                missing1.clone(),
                a.clone(),
                b.clone(),
                missing2,
                c.clone(),
            ],
            &mut log,
        );

        assert_eq!(kept, vec![a, b, c]);
        assert_eq!(log.count(Severity::Warning), 2);
        assert!(log.entries()[0]
            .message
            .contains(&missing1.display().to_string()));
    }

    #[test]
    fn test_parse_then_retain_scenario() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.ps");
        let b = dir.path().join("b.ps");
        std::fs::write(&a, "%!PS").unwrap();
        std::fs::write(&b, "%!PS").unwrap();
        let missing = dir.path().join("missing.ps");

        let content = format!(
            "{}({}) prun\n({}) prun\n({}) prun\n",
            header(),
            a.display(),
            missing.display(),
            b.display()
        );
        let mut log = JobLog::new("job.ps");
        let kept = retain_existing(WorkFile::parse(&content).references(), &mut log);

        assert_eq!(kept, vec![a, b]);
        assert_eq!(log.count(Severity::Warning), 1);
    }
}
