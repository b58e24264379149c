//! Documents and the document set flowing through the pipeline.
//!
//! A [`Document`] is created once per discovered file during the Read phase.
//! Stages replace its content wholesale and may rewrite any part of its
//! [`PathInfo`]; the writer always derives the output location from the
//! current path fields via [`Document::path_with_extension`].

use crate::naming::{join_dir_name, parse_relative_path};
use std::collections::BTreeMap;
use std::fs::Metadata;
use std::time::SystemTime;

/// All documents of a build, keyed by their original `/`-separated path
/// relative to the source directory.
///
/// Stages may add, remove, or replace entries. Keys are not rewritten when a
/// stage renames a document; the writer ignores them and uses the document's
/// own path fields.
pub type DocumentSet = BTreeMap<String, Document>;

/// Path components derived from a document's relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    /// Directories relative to the source root, `/`-separated.
    pub dir: String,
    /// Extension with its leading dot.
    pub ext: String,
    /// File name without extension.
    pub name: String,
    /// Original path relative to the source root, extension included.
    pub rel: String,
}

impl PathInfo {
    pub fn parse(rel: &str) -> Self {
        let parsed = parse_relative_path(rel);
        Self {
            dir: parsed.dir,
            ext: parsed.ext,
            name: parsed.name,
            rel: rel.to_string(),
        }
    }
}

/// Filesystem metadata captured when the source file was read.
///
/// Provenance only: nothing keeps it in sync with transformed content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileStats {
    /// Size in bytes of the source file.
    pub len: u64,
    pub modified: Option<SystemTime>,
    pub created: Option<SystemTime>,
    pub readonly: bool,
}

impl From<&Metadata> for FileStats {
    fn from(meta: &Metadata) -> Self {
        Self {
            len: meta.len(),
            modified: meta.modified().ok(),
            created: meta.created().ok(),
            readonly: meta.permissions().readonly(),
        }
    }
}

/// One file's content, path components and source metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub content: Vec<u8>,
    pub path: PathInfo,
    pub stats: FileStats,
}

impl Document {
    pub fn new(content: impl Into<Vec<u8>>, rel: &str, stats: FileStats) -> Self {
        Self {
            content: content.into(),
            path: PathInfo::parse(rel),
            stats,
        }
    }

    /// Relative output path: `dir/name` + `ext`.
    ///
    /// Recomputed from the current fields on every call.
    pub fn path_with_extension(&self) -> String {
        format!("{}{}", self.path_without_extension(), self.path.ext)
    }

    /// Relative output path without the extension: `dir/name`.
    pub fn path_without_extension(&self) -> String {
        join_dir_name(&self.path.dir, &self.path.name)
    }

    /// Replace the extension. A missing leading dot is added.
    pub fn set_extension(&mut self, ext: &str) {
        self.path.ext = if ext.is_empty() || ext.starts_with('.') {
            ext.to_string()
        } else {
            format!(".{ext}")
        };
    }

    /// Content as UTF-8, or `None` for binary files.
    pub fn content_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }

    pub fn set_content(&mut self, content: impl Into<Vec<u8>>) {
        self.content = content.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_info_from_nested_path() {
        let doc = Document::new("x", "a/b/c.txt", FileStats::default());
        assert_eq!(
            doc.path,
            PathInfo {
                dir: "a/b".into(),
                ext: ".txt".into(),
                name: "c".into(),
                rel: "a/b/c.txt".into(),
            }
        );
        assert_eq!(doc.path_with_extension(), "a/b/c.txt");
        assert_eq!(doc.path_without_extension(), "a/b/c");
    }

    #[test]
    fn root_document_has_no_leading_separator() {
        let doc = Document::new("", "index.md", FileStats::default());
        assert_eq!(doc.path_with_extension(), "index.md");
        assert_eq!(doc.path_without_extension(), "index");
    }

    #[test]
    fn derived_paths_follow_field_rewrites() {
        let mut doc = Document::new("", "posts/hello.md", FileStats::default());
        doc.path.ext = ".html".into();
        assert_eq!(doc.path_with_extension(), "posts/hello.html");

        doc.path.dir = "blog/2024".into();
        doc.path.name = "index".into();
        assert_eq!(doc.path_with_extension(), "blog/2024/index.html");
        // Original path is kept for provenance
        assert_eq!(doc.path.rel, "posts/hello.md");
    }

    #[test]
    fn set_extension_adds_missing_dot() {
        let mut doc = Document::new("", "a.md", FileStats::default());
        doc.set_extension("html");
        assert_eq!(doc.path.ext, ".html");
        doc.set_extension(".txt");
        assert_eq!(doc.path.ext, ".txt");
        doc.set_extension("");
        assert_eq!(doc.path_with_extension(), "a");
    }

    #[test]
    fn content_str_rejects_binary() {
        let text = Document::new("hello", "a.txt", FileStats::default());
        assert_eq!(text.content_str(), Some("hello"));

        let binary = Document::new(vec![0xff, 0xfe, 0x00], "a.bin", FileStats::default());
        assert_eq!(binary.content_str(), None);
    }

    #[test]
    fn stats_from_metadata() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("f.txt");
        std::fs::write(&path, b"12345").unwrap();

        let stats = FileStats::from(&std::fs::metadata(&path).unwrap());
        assert_eq!(stats.len, 5);
        assert!(stats.modified.is_some());
    }
}
