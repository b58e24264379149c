//! Filesystem collaborator used by the pipeline.
//!
//! The [`Filesystem`] trait covers the four primitive operations the
//! orchestrator needs: enumerate, stat-and-read, recursive delete, and write.
//! [`LocalFs`] is the production implementation on top of `walkdir` and
//! `tokio::fs`. Tests swap in wrappers that fail on chosen paths.

use crate::document::FileStats;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Primitive file operations the pipeline is built on.
///
/// Every operation is independent per path; the orchestrator decides how
/// failures combine.
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// List every file under `root`, recursively, as absolute paths.
    async fn enumerate(&self, root: &Path) -> io::Result<Vec<PathBuf>>;

    /// Stat a file and read its bytes.
    async fn stat_and_read(&self, path: &Path) -> io::Result<(FileStats, Vec<u8>)>;

    /// Erase everything inside `dir`, keeping `dir` itself.
    ///
    /// A missing directory counts as already empty.
    async fn remove_dir_contents(&self, dir: &Path) -> io::Result<()>;

    /// Write `bytes` to `path`, creating parent directories as needed.
    async fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;
}

/// The local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

#[async_trait]
impl Filesystem for LocalFs {
    async fn enumerate(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || walk_files(&root))
            .await
            .map_err(io::Error::other)?
    }

    async fn stat_and_read(&self, path: &Path) -> io::Result<(FileStats, Vec<u8>)> {
        let meta = tokio::fs::metadata(path).await?;
        let bytes = tokio::fs::read(path).await?;
        Ok((FileStats::from(&meta), bytes))
    }

    async fn remove_dir_contents(&self, dir: &Path) -> io::Result<()> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }

    async fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await
    }
}

/// Walk `root` and collect files, sorted.
///
/// Symlinks are not followed into directories. A symlink to a file, or one
/// whose target is missing, is listed like a file so that reading it surfaces
/// the real error.
fn walk_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("source directory not found: {}", root.display()),
        ));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        let file_type = entry.file_type();
        let is_file = file_type.is_file()
            || (file_type.is_symlink() && !entry.path().is_dir());
        if is_file {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}
