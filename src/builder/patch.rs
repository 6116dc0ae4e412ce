//! Line-oriented patching of generated configuration files.
//!
//! `pyqtdeploycli` writes its config files fresh on every run; the handful
//! of settings we need to override are injected by pattern-matched line
//! edits, not by a templating engine. The whole file is consumed and
//! rewritten; there is no byte-offset mutation.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("cannot read {path} as text: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub enum LineMatch {
    StartsWith(String),
    Contains(String),
}

impl LineMatch {
    fn matches(&self, line: &str) -> bool {
        match self {
            Self::StartsWith(prefix) => line.starts_with(prefix),
            Self::Contains(needle) => line.contains(needle),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PatchAction {
    Rewrite(String),
    InsertBefore(String),
    InsertAfter(String),
}

/// A line predicate plus the edit applied where it matches.
#[derive(Debug, Clone)]
pub struct PatchRule {
    matcher: LineMatch,
    action: PatchAction,
}

impl PatchRule {
    pub fn rewrite(matcher: LineMatch, replacement: impl Into<String>) -> Self {
        Self {
            matcher,
            action: PatchAction::Rewrite(replacement.into()),
        }
    }

    pub fn insert_before(matcher: LineMatch, line: impl Into<String>) -> Self {
        Self {
            matcher,
            action: PatchAction::InsertBefore(line.into()),
        }
    }

    pub fn insert_after(matcher: LineMatch, line: impl Into<String>) -> Self {
        Self {
            matcher,
            action: PatchAction::InsertAfter(line.into()),
        }
    }
}

/// Apply `rules` to `original`, line by line.
///
/// For each line the first matching rule in declared order applies; unmatched
/// lines pass through unchanged, keeping their relative order.
pub fn apply(original: &str, rules: &[PatchRule]) -> String {
    let mut out = String::with_capacity(original.len());

    for line in original.lines() {
        match rules.iter().find(|rule| rule.matcher.matches(line)) {
            None => push_line(&mut out, line),
            Some(rule) => match &rule.action {
                PatchAction::Rewrite(replacement) => push_line(&mut out, replacement),
                PatchAction::InsertBefore(inserted) => {
                    push_line(&mut out, inserted);
                    push_line(&mut out, line);
                }
                PatchAction::InsertAfter(inserted) => {
                    push_line(&mut out, line);
                    push_line(&mut out, inserted);
                }
            },
        }
    }

    out
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
}

/// Apply `rules` to the file at `path`, replacing its content.
pub fn patch_file(path: &Path, rules: &[PatchRule]) -> Result<(), PatchError> {
    let original = std::fs::read_to_string(path).map_err(|source| PatchError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, apply(&original, rules)).map_err(|source| PatchError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn pylib_rule() -> PatchRule {
        PatchRule::rewrite(
            LineMatch::StartsWith("py_pylib_lib".to_string()),
            "py_pylib_lib = python%(py_major)%(py_minor)",
        )
    }

    #[test]
    fn rewrites_matching_lines_and_passes_the_rest_through() {
        let original = "py_major = 3\npy_pylib_lib = python37_d\npy_minor = 7\n";
        let patched = apply(original, &[pylib_rule()]);
        assert_eq!(
            patched,
            "py_major = 3\npy_pylib_lib = python%(py_major)%(py_minor)\npy_minor = 7\n"
        );
    }

    #[test]
    fn untouched_lines_keep_their_relative_order() {
        let original = "a\nb\nc\n";
        assert_eq!(apply(original, &[pylib_rule()]), original);
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = [
            PatchRule::rewrite(LineMatch::Contains("x".to_string()), "first"),
            PatchRule::rewrite(LineMatch::Contains("x".to_string()), "second"),
        ];
        assert_eq!(apply("x\n", &rules), "first\n");
    }

    #[test]
    fn insertions_keep_the_matched_line() {
        let rules = [
            PatchRule::insert_before(LineMatch::StartsWith("TARGET".to_string()), "# injected"),
            PatchRule::insert_after(LineMatch::StartsWith("SOURCES".to_string()), "extra.cpp"),
        ];
        let patched = apply("TARGET = designer\nSOURCES = main.cpp\n", &rules);
        assert_eq!(
            patched,
            "# injected\nTARGET = designer\nSOURCES = main.cpp\nextra.cpp\n"
        );
    }

    #[test]
    fn rewrite_is_idempotent_once_lines_are_in_target_form() {
        let original = "py_pylib_lib = python37\nother = 1\n";
        let once = apply(original, &[pylib_rule()]);
        let twice = apply(&once, &[pylib_rule()]);
        assert_eq!(once, twice);
    }

    #[test]
    fn patch_file_rewrites_in_place() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pyqt5-win.cfg");
        std::fs::write(&path, "py_pylib_lib = python37\nqt_shared = False\n")?;

        patch_file(&path, &[pylib_rule()])?;

        let patched = std::fs::read_to_string(&path)?;
        assert_eq!(
            patched,
            "py_pylib_lib = python%(py_major)%(py_minor)\nqt_shared = False\n"
        );
        Ok(())
    }

    #[test]
    fn non_text_input_is_a_patch_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("binary.cfg");
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x01])?;

        assert!(matches!(
            patch_file(&path, &[pylib_rule()]),
            Err(PatchError::Read { .. })
        ));
        Ok(())
    }
}
