//! Stage capabilities.
//!
//! Every plugin implements exactly one of these traits:
//! - [`Source`]: produces a lazy stream of items
//! - [`Transform`]: maps an item to another item, or drops it
//! - [`Amplifier`]: expands one item into zero or more items
//! - [`Sink`]: consumes an item and reports a [`Status`]
//! - [`Reactor`]: observes a sink's status after the fact
//!
//! Stages are shared behind `Arc` and invoked concurrently up to the limit of
//! whatever owns them, so implementations must be reentrant.

use std::any::Any;
use std::fmt::Debug;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed error type accepted from plugin code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Anything that can flow through a pipeline.
pub trait Item: Clone + Debug + Send + Sync + 'static {}

impl<T> Item for T where T: Clone + Debug + Send + Sync + 'static {}

/// Error raised by a stage invocation.
#[derive(Debug, Error)]
pub enum StageError {
    /// Plain failure message.
    #[error("{0}")]
    Message(String),

    /// Failure wrapping an underlying error.
    #[error(transparent)]
    Source(#[from] BoxError),

    /// The stage panicked; the panic was contained.
    #[error("stage panicked: {0}")]
    Panicked(String),
}

impl StageError {
    /// Creates a message error.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Whether this error came from a contained panic.
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }
}

/// Outcome of a sink consuming one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Status {
    /// The item was consumed successfully.
    Success,
    /// A filter in front of the sink dropped the item.
    Skipped,
    /// The sink finished with a non-zero return code.
    Code(i32),
    /// The sink reported a failure.
    Failed(String),
}

impl Status {
    /// Returns true only for [`Status::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Maps a process-style return code to a status.
    pub fn from_code(code: i32) -> Self {
        if code == 0 {
            Self::Success
        } else {
            Self::Code(code)
        }
    }

    /// Short label used for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Skipped => "skipped",
            Self::Code(_) => "code",
            Self::Failed(_) => "failed",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Skipped => write!(f, "skipped"),
            Self::Code(code) => write!(f, "exit code {}", code),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Produces items.
pub trait Source<T>: Send + Sync {
    /// Diagnostic name.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Starts a new production run.
    ///
    /// The stream is lazy and may be infinite. An `Err` element ends the run;
    /// callers log it and stop pulling. Calling `produce` again starts over.
    fn produce(&self) -> BoxStream<'_, Result<T, StageError>>;
}

/// Maps an item to another item, or drops it by returning `None`.
#[async_trait]
pub trait Transform<T>: Send + Sync {
    /// Diagnostic name.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn apply(&self, item: T) -> Result<Option<T>, StageError>;
}

/// Expands one item into zero or more items.
pub trait Amplifier<T>: Send + Sync {
    /// Diagnostic name.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn amplify(&self, item: T) -> BoxStream<'_, Result<T, StageError>>;
}

/// Consumes one item and reports exactly one status.
#[async_trait]
pub trait Sink<T>: Send + Sync {
    /// Diagnostic name.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn consume(&self, item: T) -> Result<Status, StageError>;
}

/// Observes an item together with the status its sink produced.
#[async_trait]
pub trait Reactor<T>: Send + Sync {
    /// Diagnostic name.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Returns the status to pass on, possibly rewritten.
    async fn react(&self, item: &T, status: Status) -> Result<Status, StageError>;
}

impl<T, S: Source<T> + ?Sized> Source<T> for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn produce(&self) -> BoxStream<'_, Result<T, StageError>> {
        (**self).produce()
    }
}

#[async_trait]
impl<T: Send + 'static, S: Transform<T> + ?Sized> Transform<T> for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn apply(&self, item: T) -> Result<Option<T>, StageError> {
        (**self).apply(item).await
    }
}

impl<T, S: Amplifier<T> + ?Sized> Amplifier<T> for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn amplify(&self, item: T) -> BoxStream<'_, Result<T, StageError>> {
        (**self).amplify(item)
    }
}

#[async_trait]
impl<T: Send + 'static, S: Sink<T> + ?Sized> Sink<T> for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn consume(&self, item: T) -> Result<Status, StageError> {
        (**self).consume(item).await
    }
}

#[async_trait]
impl<T: Sync + 'static, S: Reactor<T> + ?Sized> Reactor<T> for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn react(&self, item: &T, status: Status) -> Result<Status, StageError> {
        (**self).react(item, status).await
    }
}

/// A [`Transform`] backed by a plain closure.
pub struct FnTransform<F> {
    name: String,
    f: F,
}

impl<F> FnTransform<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<T, F> Transform<T> for FnTransform<F>
where
    T: Send + 'static,
    F: Fn(T) -> Option<T> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, item: T) -> Result<Option<T>, StageError> {
        Ok((self.f)(item))
    }
}

/// Awaits a stage future, turning a panic into [`StageError::Panicked`].
pub(crate) async fn contain<F, R>(fut: F) -> Result<R, StageError>
where
    F: Future<Output = Result<R, StageError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(StageError::Panicked(panic_message(payload.as_ref()))),
    }
}

/// Pulls the next element of a stage stream, containing panics.
///
/// A panic is reported as a final `Some(Err(..))`; callers stop pulling after
/// the first error anyway.
pub(crate) async fn next_contained<T>(
    stream: &mut BoxStream<'_, Result<T, StageError>>,
) -> Option<Result<T, StageError>> {
    use futures::StreamExt;

    match AssertUnwindSafe(stream.next()).catch_unwind().await {
        Ok(next) => next,
        Err(payload) => Some(Err(StageError::Panicked(panic_message(payload.as_ref())))),
    }
}

/// Opens a stage stream, turning a panic in the opener into a one-element
/// error stream.
pub(crate) fn open_contained<'a, T: Send + 'a>(
    open: impl FnOnce() -> BoxStream<'a, Result<T, StageError>>,
) -> BoxStream<'a, Result<T, StageError>> {
    match std::panic::catch_unwind(AssertUnwindSafe(open)) {
        Ok(stream) => stream,
        Err(payload) => {
            let err = StageError::Panicked(panic_message(payload.as_ref()));
            Box::pin(futures::stream::once(async move { Err(err) }))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
