//! # Ditto
//!
//! A minimal static build pipeline. Every file under a source directory is
//! loaded into memory as a [`Document`](document::Document), the whole set is
//! handed through an ordered chain of stages, and whatever remains is written
//! to a destination directory. Static-site generators and similar
//! file-transformation tools are built by registering stages.
//!
//! # Architecture: Four-Phase Build
//!
//! ```text
//! 1. Discover      src/          →  file list      (every file, recursively)
//! 2. Read          file list     →  DocumentSet    (concurrent, all-or-nothing)
//! 3. Run-stages    DocumentSet   →  DocumentSet    (one stage at a time, in order)
//! 4. Write         DocumentSet   →  build/         (concurrent, best-effort)
//! ```
//!
//! Each phase settles completely before the next begins. Stages never
//! overlap: a stage owns the document set (`&mut`) until its `run` future
//! completes, which is also the only way the pipeline advances.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`pipeline`] | The orchestrator: configuration, phase sequencing, errors, events |
//! | [`stage`] | The stage contract plus closure and continuation-passing adapters |
//! | [`document`] | `Document`, its path components and source metadata; `DocumentSet` |
//! | [`naming`] | Relative-path parsing (dir / name / ext) and separator normalization |
//! | [`fs`] | The filesystem collaborator trait and its local-disk implementation |
//! | [`config`] | `ditto.toml` loading, merging over defaults, validation |
//! | [`output`] | CLI output formatting for events, reports and checks |
//!
//! # Design Decisions
//!
//! ## Fail Fast on Read, Best Effort on Write
//!
//! A stage that sees only part of the source tree can produce a subtly wrong
//! site (missing pages in an index, broken links), so any read failure stops
//! the build before stages run. Writes are independent of one another; a
//! failed file is reported and the rest of the site is still written.
//!
//! ## Completion Is the Continuation
//!
//! Stages are `async fn run(&self, &mut DocumentSet, &mut Context)`. The
//! future completing is the advance signal, so "advance exactly once" holds
//! by construction. Callback-style stages go through
//! [`stage::continuation`], whose [`Next`](stage::Next) handle is consumed
//! on call and detected when dropped.
//!
//! ## Events Are Output Only
//!
//! Phase boundaries are published as [`BuildEvent`](pipeline::BuildEvent)s
//! on an optional channel for progress display. Phase sequencing is plain
//! `async` code and never depends on who is listening.

pub mod config;
pub mod document;
pub mod fs;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod stage;

pub use document::{Document, DocumentSet, FileStats, PathInfo};
pub use pipeline::{BuildError, BuildEvent, BuildReport, BuildState, Pipeline};
pub use stage::{Context, Metadata, Next, Stage, StageError};

#[cfg(test)]
pub(crate) mod test_helpers;
