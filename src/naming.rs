//! Centralized parsing for document-relative paths.
//!
//! Every document is keyed by its path relative to the source root. That path
//! is split once into directory, base name, and extension so stages can
//! rewrite one part (usually the extension) without re-parsing the whole.
//!
//! ## Separators
//!
//! Relative paths always use `/`, regardless of platform. Paths coming from
//! the filesystem go through [`normalize_separators`] before parsing.
//!
//! ## Extensions
//!
//! The extension is everything from the last `.` of the final segment, dot
//! included. A leading dot does not start an extension:
//! - `a/b/c.txt` → dir=`a/b`, name=`c`, ext=`.txt`
//! - `archive.tar.gz` → name=`archive.tar`, ext=`.gz`
//! - `.gitignore` → name=`.gitignore`, ext=``
//! - `Makefile` → name=`Makefile`, ext=``

use std::path::{Component, Path};

/// Result of parsing a relative path like `posts/2024/hello.md`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPath {
    /// Directory part, empty for files at the root.
    pub dir: String,
    /// Base name without the extension.
    pub name: String,
    /// Extension including its leading dot, or empty.
    pub ext: String,
}

/// Parse a `/`-separated relative path into its components.
///
/// Trailing separators are ignored, so `"a/b/"` parses like `"a/b"`.
pub fn parse_relative_path(rel: &str) -> ParsedPath {
    let trimmed = rel.trim_end_matches('/');
    let (dir, base) = match trimmed.rfind('/') {
        Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
        None => ("", trimmed),
    };

    let (name, ext) = match base.rfind('.') {
        Some(pos) if pos > 0 => (&base[..pos], &base[pos..]),
        _ => (base, ""),
    };

    ParsedPath {
        dir: dir.to_string(),
        name: name.to_string(),
        ext: ext.to_string(),
    }
}

/// Join a directory and base name with `/`, skipping the separator when the
/// directory is empty.
pub fn join_dir_name(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Render a filesystem path as a `/`-separated relative key.
///
/// `.` components are dropped; everything else is kept verbatim.
pub fn normalize_separators(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether a relative key stays inside the tree it is relative to.
///
/// Rejects absolute keys and any `..` segment, so a stage cannot make the
/// writer escape the destination directory.
pub fn is_contained(rel: &str) -> bool {
    !rel.is_empty()
        && !rel.starts_with('/')
        && !Path::new(rel).is_absolute()
        && rel.split('/').all(|seg| seg != "..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_path_with_extension() {
        let p = parse_relative_path("a/b/c.txt");
        assert_eq!(p.dir, "a/b");
        assert_eq!(p.name, "c");
        assert_eq!(p.ext, ".txt");
    }

    #[test]
    fn root_level_file() {
        let p = parse_relative_path("index.md");
        assert_eq!(p.dir, "");
        assert_eq!(p.name, "index");
        assert_eq!(p.ext, ".md");
    }

    #[test]
    fn only_last_dot_starts_extension() {
        let p = parse_relative_path("dist/archive.tar.gz");
        assert_eq!(p.name, "archive.tar");
        assert_eq!(p.ext, ".gz");
    }

    #[test]
    fn dotfile_has_no_extension() {
        let p = parse_relative_path("conf/.gitignore");
        assert_eq!(p.dir, "conf");
        assert_eq!(p.name, ".gitignore");
        assert_eq!(p.ext, "");
    }

    #[test]
    fn dotfile_with_extension() {
        let p = parse_relative_path(".env.local");
        assert_eq!(p.name, ".env");
        assert_eq!(p.ext, ".local");
    }

    #[test]
    fn no_extension() {
        let p = parse_relative_path("bin/Makefile");
        assert_eq!(p.name, "Makefile");
        assert_eq!(p.ext, "");
    }

    #[test]
    fn trailing_dot_is_the_extension() {
        let p = parse_relative_path("notes.");
        assert_eq!(p.name, "notes");
        assert_eq!(p.ext, ".");
    }

    #[test]
    fn join_skips_empty_dir() {
        assert_eq!(join_dir_name("", "index"), "index");
        assert_eq!(join_dir_name("a/b", "c"), "a/b/c");
        assert_eq!(join_dir_name("a/b/", "c"), "a/b/c");
    }

    #[test]
    fn normalize_uses_forward_slashes() {
        let path: std::path::PathBuf = ["posts", "2024", "hello.md"].iter().collect();
        assert_eq!(normalize_separators(&path), "posts/2024/hello.md");
    }

    #[test]
    fn normalize_drops_current_dir() {
        assert_eq!(normalize_separators(Path::new("./a/./b.txt")), "a/b.txt");
    }

    #[test]
    fn containment() {
        assert!(is_contained("a/b.txt"));
        assert!(is_contained("..hidden"));
        assert!(!is_contained("../escape.txt"));
        assert!(!is_contained("a/../../b"));
        assert!(!is_contained("/etc/passwd"));
        assert!(!is_contained(""));
    }
}
