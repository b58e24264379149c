//! The stage contract every pipeline transformation implements.
//!
//! A stage receives exclusive access to the [`DocumentSet`] and the build
//! [`Context`] for the duration of its `run` call. Returning from `run` is the
//! one and only signal that the pipeline may advance; the orchestrator never
//! starts the next stage before the current future completes.
//!
//! # Writing stages
//!
//! - Implement [`Stage`] directly for async stages.
//! - [`from_fn`] wraps a synchronous closure.
//! - [`continuation`] wraps a callback-style closure that receives ownership of
//!   the set and context plus a [`Next`] handle. `Next::call` consumes the
//!   handle, so a second call does not compile; dropping it without calling
//!   fails the build with [`ContinuationDropped`] instead of hanging.
//!
//! ```no_run
//! use ditto::stage::{self, StageError};
//!
//! let upper = stage::from_fn("uppercase", |documents, _context| {
//!     for doc in documents.values_mut() {
//!         doc.content = doc.content.to_ascii_uppercase();
//!     }
//!     Ok::<(), StageError>(())
//! });
//! # let _ = upper;
//! ```

use crate::document::DocumentSet;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::oneshot;

/// Shared key/value data stages use to talk to each other.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Error type stages return. Any error type can be boxed into it.
pub type StageError = Box<dyn std::error::Error + Send + Sync>;

/// Build-wide context handed to every stage.
#[derive(Debug, Clone, Default)]
pub struct Context {
    source: PathBuf,
    destination: PathBuf,
    clobber: bool,
    /// Shared metadata, seeded from the pipeline configuration.
    pub metadata: Metadata,
}

impl Context {
    pub fn new(source: PathBuf, destination: PathBuf, clobber: bool, metadata: Metadata) -> Self {
        Self {
            source,
            destination,
            clobber,
            metadata,
        }
    }

    /// Absolute source directory of this build.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Absolute destination directory of this build.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn clobber(&self) -> bool {
        self.clobber
    }
}

/// A pipeline transformation.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Name used in logs, events and errors.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Transform the document set. Completion hands control to the next stage;
    /// an error aborts the build.
    async fn run(&self, documents: &mut DocumentSet, context: &mut Context)
    -> Result<(), StageError>;
}

#[async_trait]
impl<S: Stage + ?Sized> Stage for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn run(
        &self,
        documents: &mut DocumentSet,
        context: &mut Context,
    ) -> Result<(), StageError> {
        (**self).run(documents, context).await
    }
}

// ============================================================================
// Closure stages
// ============================================================================

/// Stage backed by a synchronous closure. See [`from_fn`].
pub struct FnStage<F> {
    name: String,
    f: F,
}

/// Build a stage from a synchronous closure.
pub fn from_fn<F>(name: impl Into<String>, f: F) -> FnStage<F>
where
    F: Fn(&mut DocumentSet, &mut Context) -> Result<(), StageError> + Send + Sync,
{
    FnStage {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&mut DocumentSet, &mut Context) -> Result<(), StageError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        documents: &mut DocumentSet,
        context: &mut Context,
    ) -> Result<(), StageError> {
        (self.f)(documents, context)
    }
}

// ============================================================================
// Continuation-passing stages
// ============================================================================

/// Returned by a continuation stage whose [`Next`] was dropped uncalled.
#[derive(Error, Debug)]
#[error("continuation was dropped without being called")]
pub struct ContinuationDropped;

/// One-shot handle a continuation stage calls to hand the build back.
#[derive(Debug)]
pub struct Next {
    tx: oneshot::Sender<(DocumentSet, Context)>,
}

impl Next {
    /// Return ownership of the documents and context to the pipeline.
    pub fn call(self, documents: DocumentSet, context: Context) {
        // The receiver only goes away if the build itself was dropped.
        let _ = self.tx.send((documents, context));
    }
}

/// Stage backed by a continuation-passing closure. See [`continuation`].
pub struct ContinuationStage<F> {
    name: String,
    f: F,
}

/// Build a stage in continuation-passing style.
///
/// The closure gets the document set and context by value together with a
/// [`Next`] handle, and may hand them to a spawned task before calling
/// `next.call(documents, context)`.
pub fn continuation<F>(name: impl Into<String>, f: F) -> ContinuationStage<F>
where
    F: Fn(DocumentSet, Context, Next) + Send + Sync,
{
    ContinuationStage {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F> Stage for ContinuationStage<F>
where
    F: Fn(DocumentSet, Context, Next) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        documents: &mut DocumentSet,
        context: &mut Context,
    ) -> Result<(), StageError> {
        let (tx, rx) = oneshot::channel();
        (self.f)(
            std::mem::take(documents),
            std::mem::take(context),
            Next { tx },
        );
        let (returned_documents, returned_context) =
            rx.await.map_err(|_| Box::new(ContinuationDropped) as StageError)?;
        *documents = returned_documents;
        *context = returned_context;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, FileStats};
    use std::time::Duration;

    fn documents(paths: &[&str]) -> DocumentSet {
        paths
            .iter()
            .map(|p| (p.to_string(), Document::new(*p, p, FileStats::default())))
            .collect()
    }

    #[tokio::test]
    async fn fn_stage_mutates_in_place() {
        let stage = from_fn("drop-txt", |documents, context| {
            documents.retain(|_, d| d.path.ext != ".txt");
            context.metadata.insert("dropped".into(), true.into());
            Ok(())
        });
        let mut docs = documents(&["a.md", "b.txt"]);
        let mut ctx = Context::default();

        stage.run(&mut docs, &mut ctx).await.unwrap();

        assert_eq!(docs.keys().collect::<Vec<_>>(), vec!["a.md"]);
        assert_eq!(ctx.metadata["dropped"], true);
        assert_eq!(stage.name(), "drop-txt");
    }

    #[tokio::test]
    async fn fn_stage_error_is_returned() {
        let stage = from_fn("fails", |_, _| Err("bad front matter".into()));
        let err = stage
            .run(&mut DocumentSet::new(), &mut Context::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "bad front matter");
    }

    #[tokio::test]
    async fn continuation_called_synchronously() {
        let stage = continuation("sync", |mut documents, context, next| {
            documents.remove("b.txt");
            next.call(documents, context);
        });
        let mut docs = documents(&["a.md", "b.txt"]);
        stage.run(&mut docs, &mut Context::default()).await.unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn continuation_called_after_async_work() {
        let stage = continuation("later", |mut documents, mut context, next| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                documents.insert(
                    "late.txt".into(),
                    Document::new("late", "late.txt", FileStats::default()),
                );
                context.metadata.insert("slept".into(), 20.into());
                next.call(documents, context);
            });
        });
        let mut docs = documents(&["a.md"]);
        let mut ctx = Context::new("/src".into(), "/out".into(), true, Metadata::new());

        stage.run(&mut docs, &mut ctx).await.unwrap();

        assert!(docs.contains_key("late.txt"));
        assert_eq!(ctx.metadata["slept"], 20);
        assert_eq!(ctx.source(), Path::new("/src"));
    }

    #[tokio::test]
    async fn dropped_continuation_is_an_error() {
        let stage = continuation("forgetful", |_, _, next| drop(next));
        let err = stage
            .run(&mut documents(&["a.md"]), &mut Context::default())
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<ContinuationDropped>().is_some());
    }

    #[tokio::test]
    async fn boxed_stage_delegates() {
        let stage: Box<dyn Stage> = Box::new(from_fn("boxed", |_, _| Ok(())));
        assert_eq!(stage.name(), "boxed");
        stage
            .run(&mut DocumentSet::new(), &mut Context::default())
            .await
            .unwrap();
    }
}
