//! Build orchestration: Discover → Read → Run-stages → Write.
//!
//! [`Pipeline`] owns the build configuration and the ordered stage list and
//! drives one build at a time through four phases:
//!
//! ```text
//! 1. Discover      source/        →  file list      (recursive, every file)
//! 2. Read          file list      →  DocumentSet    (concurrent, fail-fast)
//! 3. Run-stages    DocumentSet    →  DocumentSet    (clobber, then stages in order)
//! 4. Write         DocumentSet    →  destination/   (concurrent, best-effort)
//! ```
//!
//! ## Failure policy
//!
//! Discover, Read, the destination clobber and every stage are fatal: the
//! build stops and nothing is written. Write is the only phase that tolerates
//! partial failure. Failed files are logged, emitted as
//! [`BuildEvent::WriteFailed`] and collected in [`BuildReport::failed`]; their
//! siblings are still written.
//!
//! ## Observing a build
//!
//! Phase boundaries are published on an optional `std::sync::mpsc` channel
//! (see [`Pipeline::events`]). The channel is output only: nothing in the
//! build waits on it, and a dropped receiver is ignored.

use crate::config::BuildConfig;
use crate::document::{Document, DocumentSet};
use crate::fs::{Filesystem, LocalFs};
use crate::naming::{is_contained, normalize_separators};
use crate::stage::{Context, ContinuationDropped, Metadata, Stage, StageError};
use futures::FutureExt;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::any::Any;
use std::collections::BTreeSet;
use std::collections::btree_map::Entry;
use std::fmt;
use std::io;
use std::panic::AssertUnwindSafe;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Default cap on in-flight file operations during Read and Write.
pub const DEFAULT_CONCURRENCY: usize = 64;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Failed to discover files in {path}: {source}")]
    Discover { path: PathBuf, source: io::Error },
    #[error("Failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("Failed to clear destination {path}: {source}")]
    Clobber { path: PathBuf, source: io::Error },
    #[error("Stage '{stage}' failed: {source}")]
    Stage { stage: String, source: StageError },
    #[error("Stage '{stage}' panicked: {message}")]
    StagePanicked { stage: String, message: String },
    #[error("Stage '{stage}' did not finish within {timeout:?}")]
    StageTimeout { stage: String, timeout: Duration },
    #[error("Stage '{stage}' dropped its continuation without calling it")]
    ContinuationDropped { stage: String },
}

/// Where a build currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Idle,
    Discovering,
    Reading,
    RunningStages,
    Writing,
    Done,
    Failed,
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildState::Idle => "idle",
            BuildState::Discovering => "discovering",
            BuildState::Reading => "reading",
            BuildState::RunningStages => "running stages",
            BuildState::Writing => "writing",
            BuildState::Done => "done",
            BuildState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Lifecycle notifications, sent in this order during a build.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildEvent {
    /// Discover finished.
    Discovered { paths: Vec<PathBuf> },
    /// Read finished; the document set is populated.
    Read { documents: usize },
    /// The destination directory was emptied.
    Clobbered { destination: PathBuf },
    StageStarted {
        index: usize,
        name: String,
    },
    StageFinished {
        index: usize,
        name: String,
        elapsed: Duration,
    },
    /// The last stage finished.
    StagesComplete,
    WriteFailed {
        path: String,
        error: String,
    },
    /// Write settled; the build is over.
    Complete { written: usize, failed: usize },
}

/// A document that could not be written.
#[derive(Debug)]
pub struct WriteFailure {
    /// Output path relative to the destination.
    pub path: String,
    pub error: io::Error,
}

/// Outcome of a successful build.
#[derive(Debug)]
pub struct BuildReport {
    /// Files found by Discover.
    pub discovered: usize,
    /// Output paths written, relative to the destination, sorted.
    pub written: Vec<String>,
    pub failed: Vec<WriteFailure>,
    pub elapsed: Duration,
}

impl BuildReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// The build orchestrator.
///
/// Configuration setters consume and return the pipeline so they chain:
///
/// ```no_run
/// # async fn demo() -> Result<(), ditto::pipeline::BuildError> {
/// use ditto::pipeline::Pipeline;
/// use ditto::stage;
///
/// let mut pipeline = Pipeline::new("site")
///     .source("content")
///     .destination("public")
///     .clobber(false)
///     .use_stage(stage::from_fn("noop", |_, _| Ok(())));
///
/// let report = pipeline.run().await?;
/// println!("wrote {} files", report.written.len());
/// # Ok(())
/// # }
/// ```
pub struct Pipeline {
    working_dir: PathBuf,
    source: PathBuf,
    destination: PathBuf,
    clobber: bool,
    metadata: Metadata,
    concurrency: usize,
    stage_timeout: Option<Duration>,
    stages: Vec<Box<dyn Stage>>,
    fs: Arc<dyn Filesystem>,
    events: Option<Sender<BuildEvent>>,
    state: BuildState,
}

impl Default for Pipeline {
    /// Pipeline rooted at the process working directory.
    fn default() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::new(cwd)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("clobber", &self.clobber)
            .field("stages", &self.stage_names())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Create a pipeline whose relative paths resolve against `working_dir`.
    ///
    /// Defaults: source `src`, destination `build`, clobber on, no metadata.
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        let working_dir = absolutize(Path::new(""), working_dir.as_ref());
        Self {
            source: working_dir.join("src"),
            destination: working_dir.join("build"),
            working_dir,
            clobber: true,
            metadata: Metadata::new(),
            concurrency: DEFAULT_CONCURRENCY,
            stage_timeout: None,
            stages: Vec::new(),
            fs: Arc::new(LocalFs),
            events: None,
            state: BuildState::Idle,
        }
    }

    /// Create a pipeline from a loaded [`BuildConfig`].
    pub fn from_config(working_dir: impl AsRef<Path>, config: &BuildConfig) -> Self {
        Self::new(working_dir)
            .source(&config.source)
            .destination(&config.destination)
            .clobber(config.clobber)
            .metadata(config.metadata.clone())
            .concurrency(config.concurrency)
            .stage_timeout(config.stage_timeout())
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Set the source directory, resolved against the working directory.
    pub fn source(mut self, dir: impl AsRef<Path>) -> Self {
        self.source = absolutize(&self.working_dir, dir.as_ref());
        self
    }

    /// Set the destination directory, resolved against the working directory.
    pub fn destination(mut self, dir: impl AsRef<Path>) -> Self {
        self.destination = absolutize(&self.working_dir, dir.as_ref());
        self
    }

    /// Erase the destination's contents before stages run.
    pub fn clobber(mut self, clobber: bool) -> Self {
        self.clobber = clobber;
        self
    }

    /// Replace the shared metadata handed to stages.
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Cap in-flight file operations during Read and Write.
    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit;
        self
    }

    /// Fail the build when a single stage runs longer than `timeout`.
    pub fn stage_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Publish lifecycle events on `tx`.
    pub fn events(mut self, tx: Sender<BuildEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Swap the filesystem collaborator.
    pub fn filesystem(mut self, fs: impl Filesystem + 'static) -> Self {
        self.fs = Arc::new(fs);
        self
    }

    /// Append a stage. Stages run in registration order.
    pub fn use_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn source_dir(&self) -> &Path {
        &self.source
    }

    pub fn destination_dir(&self) -> &Path {
        &self.destination
    }

    pub fn is_clobbering(&self) -> bool {
        self.clobber
    }

    /// Shared metadata, including whatever stages wrote during the last build.
    pub fn shared_metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Check the configuration before any file is touched.
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.concurrency == 0 {
            return Err(BuildError::InvalidConfig(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.source == self.destination {
            return Err(BuildError::InvalidConfig(format!(
                "source and destination are the same directory: {}",
                self.source.display()
            )));
        }
        if self.clobber && self.source.starts_with(&self.destination) {
            return Err(BuildError::InvalidConfig(format!(
                "clobbering {} would erase the source directory {}",
                self.destination.display(),
                self.source.display()
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Build
    // ------------------------------------------------------------------

    /// Run a build, delivering fatal errors to `on_error`.
    ///
    /// Configuration errors are found before any I/O and returned directly.
    /// Any failure after that goes to `on_error` and the call yields
    /// `Ok(None)`.
    pub async fn build<F>(&mut self, on_error: F) -> Result<Option<BuildReport>, BuildError>
    where
        F: FnOnce(BuildError),
    {
        self.validate()?;
        match self.drive().await {
            Ok(report) => Ok(Some(report)),
            Err(err) => {
                on_error(err);
                Ok(None)
            }
        }
    }

    /// Run a build, returning every failure as `Err`.
    pub async fn run(&mut self) -> Result<BuildReport, BuildError> {
        self.validate()?;
        self.drive().await
    }

    /// Discover and read the source tree without running stages or writing.
    pub async fn load(&self) -> Result<DocumentSet, BuildError> {
        let paths = self.discover().await?;
        self.read(&paths).await
    }

    #[instrument(
        name = "build",
        skip_all,
        fields(source = %self.source.display(), destination = %self.destination.display())
    )]
    async fn drive(&mut self) -> Result<BuildReport, BuildError> {
        let started = Instant::now();
        info!(stages = self.stages.len(), clobber = self.clobber, "starting build");

        match self.phases(started).await {
            Ok(report) => {
                self.enter(BuildState::Done);
                info!(
                    written = report.written.len(),
                    failed = report.failed.len(),
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "build complete"
                );
                self.emit(BuildEvent::Complete {
                    written: report.written.len(),
                    failed: report.failed.len(),
                });
                Ok(report)
            }
            Err(err) => {
                error!(state = %self.state, error = %err, "build failed");
                self.enter(BuildState::Failed);
                Err(err)
            }
        }
    }

    async fn phases(&mut self, started: Instant) -> Result<BuildReport, BuildError> {
        self.enter(BuildState::Discovering);
        let paths = self.discover().await?;
        self.emit(BuildEvent::Discovered {
            paths: paths.clone(),
        });

        self.enter(BuildState::Reading);
        let mut documents = self.read(&paths).await?;
        self.emit(BuildEvent::Read {
            documents: documents.len(),
        });

        self.enter(BuildState::RunningStages);
        if self.clobber {
            self.clear_destination().await?;
        }
        self.run_stages(&mut documents).await?;
        self.emit(BuildEvent::StagesComplete);

        self.enter(BuildState::Writing);
        let (written, failed) = self.write(&documents).await;

        Ok(BuildReport {
            discovered: paths.len(),
            written,
            failed,
            elapsed: started.elapsed(),
        })
    }

    async fn discover(&self) -> Result<Vec<PathBuf>, BuildError> {
        let paths = self
            .fs
            .enumerate(&self.source)
            .await
            .map_err(|source| BuildError::Discover {
                path: self.source.clone(),
                source,
            })?;
        let paths = self.skip_destination(paths);
        info!(files = paths.len(), "discovered files");
        Ok(paths)
    }

    /// Drop files under the destination when it is nested in the source, so
    /// earlier output is never read back in as input.
    fn skip_destination(&self, mut paths: Vec<PathBuf>) -> Vec<PathBuf> {
        if self.destination.starts_with(&self.source) {
            let before = paths.len();
            paths.retain(|p| !p.starts_with(&self.destination));
            debug!(
                skipped = before - paths.len(),
                destination = %self.destination.display(),
                "skipping destination nested in source"
            );
        }
        paths
    }

    /// Read every path concurrently. The first failure aborts the phase.
    ///
    /// A path that cannot be turned into a key (not UTF-8) or whose key is
    /// already taken fails the phase like an unreadable file.
    async fn read(&self, paths: &[PathBuf]) -> Result<DocumentSet, BuildError> {
        let fs = &self.fs;
        let root = &self.source;

        let documents: Vec<(String, Document)> = stream::iter(paths)
            .map(|path| async move {
                let read_error = |source| BuildError::Read {
                    path: path.clone(),
                    source,
                };
                let rel = relative_key(root, path).map_err(read_error)?;
                let (stats, bytes) = fs.stat_and_read(path).await.map_err(read_error)?;
                debug!(path = %rel, bytes = bytes.len(), "read file");
                let document = Document::new(bytes, &rel, stats);
                Ok::<_, BuildError>((rel, document))
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        let mut set = DocumentSet::new();
        for (rel, document) in documents {
            match set.entry(rel) {
                Entry::Vacant(slot) => {
                    slot.insert(document);
                }
                Entry::Occupied(slot) => {
                    return Err(BuildError::Read {
                        path: root.join(&document.path.rel),
                        source: io::Error::new(
                            io::ErrorKind::AlreadyExists,
                            format!("another file already maps to '{}'", slot.key()),
                        ),
                    });
                }
            }
        }

        info!(documents = set.len(), "read files");
        Ok(set)
    }

    async fn clear_destination(&self) -> Result<(), BuildError> {
        self.fs
            .remove_dir_contents(&self.destination)
            .await
            .map_err(|source| BuildError::Clobber {
                path: self.destination.clone(),
                source,
            })?;
        info!(destination = %self.destination.display(), "cleared destination");
        self.emit(BuildEvent::Clobbered {
            destination: self.destination.clone(),
        });
        Ok(())
    }

    /// Run every stage in order, each with exclusive access to the set.
    ///
    /// Every stage call goes through the same boundary: errors, panics,
    /// dropped continuations and timeouts all become a [`BuildError`].
    async fn run_stages(&mut self, documents: &mut DocumentSet) -> Result<(), BuildError> {
        let mut context = Context::new(
            self.source.clone(),
            self.destination.clone(),
            self.clobber,
            self.metadata.clone(),
        );

        for (index, stage) in self.stages.iter().enumerate() {
            let name = stage.name().to_string();
            debug!(index, stage = %name, "running stage");
            self.emit(BuildEvent::StageStarted {
                index,
                name: name.clone(),
            });

            let started = Instant::now();
            let guarded = AssertUnwindSafe(stage.run(documents, &mut context)).catch_unwind();
            let outcome = match self.stage_timeout {
                Some(timeout) => tokio::time::timeout(timeout, guarded).await.map_err(|_| {
                    BuildError::StageTimeout {
                        stage: name.clone(),
                        timeout,
                    }
                })?,
                None => guarded.await,
            };

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(stage_error(name, err)),
                Err(panic) => {
                    return Err(BuildError::StagePanicked {
                        stage: name,
                        message: panic_message(panic.as_ref()),
                    });
                }
            }

            let elapsed = started.elapsed();
            info!(
                index,
                stage = %name,
                documents = documents.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "stage finished"
            );
            self.emit(BuildEvent::StageFinished {
                index,
                name,
                elapsed,
            });
        }

        self.metadata = context.metadata;
        Ok(())
    }

    /// Write every document concurrently. Failures are collected, not fatal.
    ///
    /// When several documents share an output path, the first in key order
    /// is written and the others fail with `AlreadyExists`.
    async fn write(&self, documents: &DocumentSet) -> (Vec<String>, Vec<WriteFailure>) {
        let fs = &self.fs;
        let destination = &self.destination;

        let mut targets: Vec<(String, &Document)> = Vec::with_capacity(documents.len());
        let mut outcomes: Vec<(String, io::Result<()>)> = Vec::new();
        let mut claimed = BTreeSet::new();
        for (key, document) in documents {
            let rel = document.path_with_extension();
            if claimed.insert(rel.clone()) {
                targets.push((rel, document));
            } else {
                outcomes.push((
                    rel,
                    Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("'{key}' has the same output path as another document"),
                    )),
                ));
            }
        }

        let settled: Vec<(String, io::Result<()>)> = stream::iter(targets)
            .map(|(rel, document)| async move {
                let outcome = if is_contained(&rel) {
                    fs.write(&destination.join(&rel), &document.content).await
                } else {
                    Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "output path escapes the destination directory",
                    ))
                };
                (rel, outcome)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        outcomes.extend(settled);

        let mut written = Vec::new();
        let mut failed = Vec::new();
        for (path, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    debug!(path = %path, "wrote file");
                    written.push(path);
                }
                Err(error) => {
                    warn!(path = %path, error = %error, "failed to write file");
                    self.emit(BuildEvent::WriteFailed {
                        path: path.clone(),
                        error: error.to_string(),
                    });
                    failed.push(WriteFailure { path, error });
                }
            }
        }
        written.sort();
        failed.sort_by(|a, b| a.path.cmp(&b.path));
        (written, failed)
    }

    fn enter(&mut self, next: BuildState) {
        debug!(from = %self.state, to = %next, "build state");
        self.state = next;
    }

    fn emit(&self, event: BuildEvent) {
        if let Some(tx) = &self.events {
            // Observers may go away mid-build.
            let _ = tx.send(event);
        }
    }
}

/// Document-set key for `path`: relative to `root`, `/`-separated.
///
/// Fails for paths that are not valid UTF-8, since a lossy key would no
/// longer name the file it came from.
fn relative_key(root: &Path, path: &Path) -> io::Result<String> {
    let rel = path.strip_prefix(root).unwrap_or(path);
    if rel.to_str().is_none() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "file name is not valid UTF-8",
        ));
    }
    Ok(normalize_separators(rel))
}

/// Resolve `path` against `base` (itself resolved against the process
/// working directory when relative) and fold away `.` and `..` lexically.
fn absolutize(base: &Path, path: &Path) -> PathBuf {
    let mut joined = base.join(path);
    if joined.as_os_str().is_empty() {
        joined = PathBuf::from(".");
    }
    let joined = std::path::absolute(&joined).unwrap_or(joined);

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn stage_error(stage: String, err: StageError) -> BuildError {
    if err.downcast_ref::<ContinuationDropped>().is_some() {
        BuildError::ContinuationDropped { stage }
    } else {
        BuildError::Stage { stage, source: err }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
