//! Stage decorators.
//!
//! Composes filters, reactors and amplifiers onto existing sources and sinks:
//! - [`WithFilter`]: a sink that only sees what its transform keeps
//! - [`WithCallback`]: a sink whose status is passed through a reactor
//! - [`FilteredSource`]: a source whose items pass through a transform
//! - [`AmplifiedSource`]: a source whose items are each expanded
//!
//! Decorators nest, so a sink with both a filter and a callback is
//! `WithCallback::new(WithFilter::new(sink, filter), reactor)`.

use async_trait::async_trait;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, warn};

use crate::stage::{Amplifier, Item, Reactor, Sink, Source, StageError, Status, Transform};

/// A sink guarded by a transform.
///
/// Items the transform drops are reported as [`Status::Skipped`] without
/// reaching the sink. A transform error fails the item.
pub struct WithFilter<S, F> {
    sink: S,
    filter: F,
}

impl<S, F> WithFilter<S, F> {
    pub fn new(sink: S, filter: F) -> Self {
        Self { sink, filter }
    }

    pub fn inner(&self) -> &S {
        &self.sink
    }
}

#[async_trait]
impl<T, S, F> Sink<T> for WithFilter<S, F>
where
    T: Item,
    S: Sink<T>,
    F: Transform<T>,
{
    fn name(&self) -> &str {
        self.sink.name()
    }

    async fn consume(&self, item: T) -> Result<Status, StageError> {
        match self.filter.apply(item).await? {
            Some(item) => self.sink.consume(item).await,
            None => {
                debug!("Filter {} skipped an item for sink {}", self.filter.name(), self.sink.name());
                Ok(Status::Skipped)
            }
        }
    }
}

/// A sink followed by a reactor.
///
/// The reactor sees every item the sink finished, along with its status, and
/// its return value becomes the reported status. A reactor error is logged
/// and the sink's own status is kept. A sink error skips the reactor.
pub struct WithCallback<S, R> {
    sink: S,
    reactor: R,
}

impl<S, R> WithCallback<S, R> {
    pub fn new(sink: S, reactor: R) -> Self {
        Self { sink, reactor }
    }

    pub fn inner(&self) -> &S {
        &self.sink
    }
}

#[async_trait]
impl<T, S, R> Sink<T> for WithCallback<S, R>
where
    T: Item,
    S: Sink<T>,
    R: Reactor<T>,
{
    fn name(&self) -> &str {
        self.sink.name()
    }

    async fn consume(&self, item: T) -> Result<Status, StageError> {
        let status = self.sink.consume(item.clone()).await?;
        match self.reactor.react(&item, status.clone()).await {
            Ok(status) => Ok(status),
            Err(e) => {
                warn!(
                    "Reactor {} failed for {:?}, keeping status {}: {}",
                    self.reactor.name(),
                    item,
                    status,
                    e
                );
                Ok(status)
            }
        }
    }
}

/// A source whose items pass through a transform before leaving it.
pub struct FilteredSource<S, F> {
    source: S,
    filter: F,
}

impl<S, F> FilteredSource<S, F> {
    pub fn new(source: S, filter: F) -> Self {
        Self { source, filter }
    }
}

impl<T, S, F> Source<T> for FilteredSource<S, F>
where
    T: Item,
    S: Source<T>,
    F: Transform<T>,
{
    fn name(&self) -> &str {
        self.source.name()
    }

    fn produce(&self) -> BoxStream<'_, Result<T, StageError>> {
        self.source
            .produce()
            .filter_map(move |result| async move {
                let item = match result {
                    Ok(item) => item,
                    Err(e) => return Some(Err(e)),
                };
                match self.filter.apply(item).await {
                    Ok(kept) => kept.map(Ok),
                    Err(e) => {
                        warn!(
                            "Filter {} failed on source {}, item skipped: {}",
                            self.filter.name(),
                            self.source.name(),
                            e
                        );
                        None
                    }
                }
            })
            .boxed()
    }
}

/// A source whose items are each expanded by an amplifier.
///
/// A failing expansion ends only the expansion of that base item; the base
/// source keeps going.
pub struct AmplifiedSource<S, A> {
    source: S,
    amplifier: A,
}

impl<S, A> AmplifiedSource<S, A> {
    pub fn new(source: S, amplifier: A) -> Self {
        Self { source, amplifier }
    }
}

impl<T, S, A> Source<T> for AmplifiedSource<S, A>
where
    T: Item,
    S: Source<T>,
    A: Amplifier<T>,
{
    fn name(&self) -> &str {
        self.source.name()
    }

    fn produce(&self) -> BoxStream<'_, Result<T, StageError>> {
        let amplifier_name = self.amplifier.name();
        self.source
            .produce()
            .flat_map(move |result| match result {
                Ok(item) => self
                    .amplifier
                    .amplify(item)
                    .scan((), move |_, expanded| {
                        future::ready(match expanded {
                            Ok(out) => Some(Ok(out)),
                            Err(e) => {
                                warn!("Amplifier {} failed, rest of its expansion skipped: {}", amplifier_name, e);
                                None
                            }
                        })
                    })
                    .boxed(),
                Err(e) => stream::once(future::ready(Err(e))).boxed(),
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::FnTransform;
    use crate::testing::{FailingSink, RecordingReactor, RecordingSink, VecSource};
    use std::sync::Arc;

    struct Repeat;

    impl Amplifier<u32> for Repeat {
        fn amplify(&self, item: u32) -> BoxStream<'_, Result<u32, StageError>> {
            if item == 0 {
                return stream::iter(vec![Err(StageError::msg("cannot repeat zero"))]).boxed();
            }
            stream::iter((0..item).map(move |_| Ok(item))).boxed()
        }
    }

    struct Refuse;

    #[async_trait]
    impl Transform<u32> for Refuse {
        async fn apply(&self, _item: u32) -> Result<Option<u32>, StageError> {
            Err(StageError::msg("filter offline"))
        }
    }

    #[async_trait]
    impl Reactor<u32> for Refuse {
        async fn react(&self, _item: &u32, _status: Status) -> Result<Status, StageError> {
            Err(StageError::msg("reactor offline"))
        }
    }

    async fn collect<T: Item>(source: &dyn Source<T>) -> Vec<Result<T, StageError>> {
        source.produce().collect().await
    }

    #[tokio::test]
    async fn test_with_filter_skips_dropped_items() {
        let sink = Arc::new(RecordingSink::new("inner"));
        let filtered = WithFilter::new(
            Arc::clone(&sink),
            FnTransform::new("even", |n: u32| (n % 2 == 0).then_some(n)),
        );

        assert_eq!(filtered.consume(2u32).await.unwrap(), Status::Success);
        assert_eq!(filtered.consume(3u32).await.unwrap(), Status::Skipped);
        assert_eq!(sink.items().await, vec![2]);
        assert_eq!(Sink::<u32>::name(&filtered), "inner");
    }

    #[tokio::test]
    async fn test_with_filter_error_fails_item() {
        let sink = Arc::new(RecordingSink::new("inner"));
        let filtered = WithFilter::new(Arc::clone(&sink), Refuse);
        assert!(filtered.consume(1u32).await.is_err());
        assert!(sink.items().await.is_empty());
    }

    #[tokio::test]
    async fn test_with_callback_sees_status() {
        let reactor = Arc::new(RecordingReactor::new());
        let sink = WithCallback::new(
            RecordingSink::new("inner").with_status(Status::Code(4)),
            Arc::clone(&reactor),
        );

        assert_eq!(sink.consume(9u32).await.unwrap(), Status::Code(4));
        assert_eq!(reactor.seen().await, vec![(9, Status::Code(4))]);
    }

    #[tokio::test]
    async fn test_with_callback_returns_reactor_status() {
        let reactor = RecordingReactor::rewriting_to(Status::Failed("post-process".into()));
        let sink = WithCallback::new(RecordingSink::new("inner"), reactor);
        assert_eq!(
            sink.consume(1u32).await.unwrap(),
            Status::Failed("post-process".into())
        );
    }

    #[tokio::test]
    async fn test_with_callback_reactor_error_keeps_status() {
        let sink = WithCallback::new(RecordingSink::new("inner"), Refuse);
        assert_eq!(sink.consume(1u32).await.unwrap(), Status::Success);
    }

    #[tokio::test]
    async fn test_with_callback_sink_error_skips_reactor() {
        let reactor = Arc::new(RecordingReactor::new());
        let sink = WithCallback::new(FailingSink::new(), Arc::clone(&reactor));
        assert!(Sink::<u32>::consume(&sink, 1).await.is_err());
        assert!(reactor.seen().await.is_empty());
    }

    #[tokio::test]
    async fn test_filter_then_callback_reports_skipped() {
        let reactor = Arc::new(RecordingReactor::new());
        let sink = WithCallback::new(
            WithFilter::new(
                RecordingSink::new("inner"),
                FnTransform::new("none", |_: u32| None),
            ),
            Arc::clone(&reactor),
        );
        assert_eq!(sink.consume(5u32).await.unwrap(), Status::Skipped);
        assert_eq!(reactor.statuses().await, vec![Status::Skipped]);
    }

    #[tokio::test]
    async fn test_filtered_source_drops_items() {
        let source = FilteredSource::new(
            VecSource::new("numbers", vec![1u32, 2, 3, 4]),
            FnTransform::new("big", |n: u32| (n > 2).then_some(n * 10)),
        );
        let items: Vec<u32> = collect(&source).await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(items, vec![30, 40]);
    }

    #[tokio::test]
    async fn test_filtered_source_skips_filter_errors() {
        let source = FilteredSource::new(VecSource::new("numbers", vec![1u32, 2]), Refuse);
        assert!(collect(&source).await.is_empty());
    }

    #[tokio::test]
    async fn test_amplified_source_expands_each_item() {
        let source = AmplifiedSource::new(VecSource::new("numbers", vec![1u32, 0, 3]), Repeat);
        let items: Vec<u32> = collect(&source).await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(items, vec![1, 3, 3, 3]);
    }
}
