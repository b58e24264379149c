//! Shared test utilities for the ditto test suite.
//!
//! Provides fixture builders, recording stages, and a filesystem wrapper that
//! fails on chosen paths.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! write_tree(&tmp.path().join("src"), &[("a.txt", "a"), ("b/c.md", "c")]);
//!
//! let (recorder, seen) = KeyRecorder::new();
//! let pipeline = Pipeline::new(tmp.path())
//!     .filesystem(FailingFs::reads(&["b/c.md"]))
//!     .use_stage(recorder);
//! ```

use crate::document::{DocumentSet, FileStats};
use crate::fs::{Filesystem, LocalFs};
use crate::pipeline::BuildEvent;
use crate::stage::{Context, Stage, StageError};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// =========================================================================
// Fixture setup
// =========================================================================

/// Create `files` (relative path, content) under `root`.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (rel, content) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
    }
}

// =========================================================================
// Stages
// =========================================================================

/// Stage that records the document keys it saw.
pub struct KeyRecorder {
    seen: Arc<Mutex<Vec<String>>>,
}

impl KeyRecorder {
    pub fn new() -> (Self, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                seen: Arc::clone(&seen),
            },
            seen,
        )
    }
}

#[async_trait]
impl Stage for KeyRecorder {
    fn name(&self) -> &str {
        "key-recorder"
    }

    async fn run(&self, documents: &mut DocumentSet, _: &mut Context) -> Result<(), StageError> {
        self.seen
            .lock()
            .unwrap()
            .extend(documents.keys().cloned());
        Ok(())
    }
}

/// Stage that inserts a placeholder, sleeps, then fills it in.
///
/// A later stage seeing the placeholder would mean the two overlapped.
pub struct SlowMarker {
    pub key: &'static str,
    pub delay: Duration,
}

#[async_trait]
impl Stage for SlowMarker {
    async fn run(&self, documents: &mut DocumentSet, _: &mut Context) -> Result<(), StageError> {
        documents.insert(
            self.key.to_string(),
            crate::document::Document::new("pending", self.key, FileStats::default()),
        );
        tokio::time::sleep(self.delay).await;
        if let Some(doc) = documents.get_mut(self.key) {
            doc.set_content("done");
        }
        Ok(())
    }
}

// =========================================================================
// Filesystem
// =========================================================================

/// [`LocalFs`] wrapper that fails reads or writes for paths ending in one of
/// the given suffixes, or every clobber.
#[derive(Default)]
pub struct FailingFs {
    read_suffixes: Vec<String>,
    write_suffixes: Vec<String>,
    fail_clobber: bool,
}

impl FailingFs {
    pub fn reads(suffixes: &[&str]) -> Self {
        Self {
            read_suffixes: suffixes.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn writes(suffixes: &[&str]) -> Self {
        Self {
            write_suffixes: suffixes.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn clobber() -> Self {
        Self {
            fail_clobber: true,
            ..Self::default()
        }
    }

    fn matches(suffixes: &[String], path: &Path) -> bool {
        suffixes.iter().any(|s| path.ends_with(s))
    }
}

fn denied(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::PermissionDenied,
        format!("injected failure: {}", path.display()),
    )
}

#[async_trait]
impl Filesystem for FailingFs {
    async fn enumerate(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        LocalFs.enumerate(root).await
    }

    async fn stat_and_read(&self, path: &Path) -> io::Result<(FileStats, Vec<u8>)> {
        if Self::matches(&self.read_suffixes, path) {
            return Err(denied(path));
        }
        LocalFs.stat_and_read(path).await
    }

    async fn remove_dir_contents(&self, dir: &Path) -> io::Result<()> {
        if self.fail_clobber {
            return Err(denied(dir));
        }
        LocalFs.remove_dir_contents(dir).await
    }

    async fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        if Self::matches(&self.write_suffixes, path) {
            return Err(denied(path));
        }
        LocalFs.write(path, bytes).await
    }
}

// =========================================================================
// Events
// =========================================================================

/// Short tag for an event, for order assertions.
pub fn event_kind(event: &BuildEvent) -> &'static str {
    match event {
        BuildEvent::Discovered { .. } => "discovered",
        BuildEvent::Read { .. } => "read",
        BuildEvent::Clobbered { .. } => "clobbered",
        BuildEvent::StageStarted { .. } => "stage-started",
        BuildEvent::StageFinished { .. } => "stage-finished",
        BuildEvent::StagesComplete => "stages-complete",
        BuildEvent::WriteFailed { .. } => "write-failed",
        BuildEvent::Complete { .. } => "complete",
    }
}
