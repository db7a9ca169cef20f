//! Filename and attribute-path validation.
//!
//! The filename alphabet is deliberately narrow; `-`, `,` and `=` carry
//! meaning in query strings, and a leading `-` would read as negation.

use regex::Regex;
use std::sync::OnceLock;

fn filename_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("static regex"))
}

/// Whether a single path component is a legal filename.
pub fn valid_filename(name: &str) -> bool {
    if name.is_empty() || name.starts_with('-') {
        return false;
    }
    filename_re().is_match(name)
}

/// Whether a slash-delimited attribute path is legal: no leading or trailing
/// slash, every component a valid filename.
pub fn valid_path(path: &str) -> bool {
    if path.starts_with('/') || path.ends_with('/') {
        return false;
    }
    path.split('/').all(valid_filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_filenames() {
        for name in ["a", "hello", "file.txt", "a_b-c.d", "0", "..."] {
            assert!(valid_filename(name), "{name:?} should be valid");
        }
    }

    #[test]
    fn rejects_bad_filenames() {
        for name in ["", "-flag", "a b", "a/b", "a,b", "a=b", "sp\u{e9}c"] {
            assert!(!valid_filename(name), "{name:?} should be invalid");
        }
    }

    #[test]
    fn accepts_nested_paths() {
        assert!(valid_path("a"));
        assert!(valid_path("a/b/c.txt"));
    }

    #[test]
    fn rejects_bad_paths() {
        for path in ["", "/a", "a/", "a//b", "a/-b", "a/b c"] {
            assert!(!valid_path(path), "{path:?} should be invalid");
        }
    }
}
