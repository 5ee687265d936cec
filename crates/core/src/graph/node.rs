//! Bounded-concurrency execution wrapper around one stage.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::metrics::record_stage_failure;
use crate::queue::{work_queue, Done, QueueHandle, QueueReceiver};
use crate::stage::{
    contain, next_contained, open_contained, Amplifier, Item, Sink, Source, StageError,
    Transform,
};

use super::{Dangling, Downstream};

/// The stage a node runs.
enum Stage<T> {
    Source(Arc<dyn Source<T>>),
    Transform(Arc<dyn Transform<T>>),
    Amplifier(Arc<dyn Amplifier<T>>),
    Sink(Arc<dyn Sink<T>>),
}

impl<T> Stage<T> {
    fn kind(&self) -> &'static str {
        match self {
            Self::Source(_) => "source",
            Self::Transform(_) => "transform",
            Self::Amplifier(_) => "amplifier",
            Self::Sink(_) => "sink",
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::Source(s) => s.name(),
            Self::Transform(s) => s.name(),
            Self::Amplifier(s) => s.name(),
            Self::Sink(s) => s.name(),
        }
    }
}

/// State shared by a node's handles and its processing loop.
///
/// It deliberately holds no queue sender: once every [`Node`] handle is
/// dropped the queue closes and the loop exits.
struct NodeCore<T> {
    name: String,
    stage: Stage<T>,
    concurrency: usize,
    limiter: Arc<Semaphore>,
    next: RwLock<Arc<dyn Downstream<T>>>,
    in_flight: AtomicUsize,
}

impl<T: Item> NodeCore<T> {
    fn successor(&self) -> Arc<dyn Downstream<T>> {
        match self.next.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn set_successor(&self, next: Arc<dyn Downstream<T>>) {
        match self.next.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    async fn run_loop(self: Arc<Self>, mut rx: QueueReceiver<T>) {
        debug!("Node {} processing loop started", self.name);
        while let Some((item, done)) = rx.pop().await {
            let permit = match Arc::clone(&self.limiter).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let core = Arc::clone(&self);
            tokio::spawn(async move {
                core.invoke(item, done).await;
                drop(permit);
            });
        }
        debug!("Node {} processing loop stopped", self.name);
    }

    async fn invoke(&self, item: T, _done: Done) {
        let _in_flight = InFlight::enter(&self.in_flight);
        let next = self.successor();

        match &self.stage {
            Stage::Source(source) => {
                let stream = open_contained(|| source.produce());
                self.forward(stream, next.as_ref()).await;
            }
            Stage::Amplifier(amplifier) => {
                debug!("Node {} amplifying item: {:?}", self.name, item);
                let stream = open_contained(|| amplifier.amplify(item));
                self.forward(stream, next.as_ref()).await;
            }
            Stage::Transform(transform) => match contain(transform.apply(item)).await {
                Ok(Some(out)) => next.accept(out).await,
                Ok(None) => debug!("Node {} dropped an item", self.name),
                Err(e) => self.report(&e),
            },
            Stage::Sink(sink) => {
                debug!("Node {} consuming item: {:?}", self.name, item);
                match contain(sink.consume(item)).await {
                    Ok(status) => debug!("Node {} sink finished: {}", self.name, status),
                    Err(e) => self.report(&e),
                }
            }
        }
    }

    async fn forward(
        &self,
        mut stream: BoxStream<'_, Result<T, StageError>>,
        next: &dyn Downstream<T>,
    ) {
        while let Some(result) = next_contained(&mut stream).await {
            match result {
                Ok(out) => next.accept(out).await,
                Err(e) => {
                    self.report(&e);
                    break;
                }
            }
        }
    }

    fn report(&self, e: &StageError) {
        record_stage_failure(self.stage.kind());
        if e.is_panic() {
            error!("Node {} ({}) panicked, output skipped: {}", self.name, self.stage.kind(), e);
        } else {
            warn!("Node {} ({}) failed, output skipped: {}", self.name, self.stage.kind(), e);
        }
    }
}

/// Decrements the in-flight gauge even if the invocation unwinds.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// A stage wrapped with its own bounded queue and concurrency limiter.
///
/// `Node` is a cheap handle; clones share the same queue, limiter and
/// successor. The processing loop is spawned on the first [`accept`].
///
/// [`accept`]: Downstream::accept
pub struct Node<T> {
    core: Arc<NodeCore<T>>,
    queue: QueueHandle<T>,
    receiver: Arc<Mutex<Option<QueueReceiver<T>>>>,
}

impl<T> Clone for Node<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            queue: self.queue.clone(),
            receiver: Arc::clone(&self.receiver),
        }
    }
}

impl<T: Item> Node<T> {
    fn build(stage: Stage<T>, concurrency: usize, capacity: usize) -> Self {
        let concurrency = concurrency.max(1);
        let name = stage.name().to_string();
        let (queue, receiver) = work_queue(capacity);
        let core = NodeCore {
            next: RwLock::new(Arc::new(Dangling::new(name.clone()))),
            name,
            stage,
            concurrency,
            limiter: Arc::new(Semaphore::new(concurrency)),
            in_flight: AtomicUsize::new(0),
        };
        Self {
            core: Arc::new(core),
            queue,
            receiver: Arc::new(Mutex::new(Some(receiver))),
        }
    }

    /// A node that ignores its input and streams the source's items onward.
    pub fn source(source: impl Source<T> + 'static, concurrency: usize) -> Self {
        Self::build(Stage::Source(Arc::new(source)), concurrency, concurrency)
    }

    pub fn transform(transform: impl Transform<T> + 'static, concurrency: usize) -> Self {
        Self::build(Stage::Transform(Arc::new(transform)), concurrency, concurrency)
    }

    pub fn amplifier(amplifier: impl Amplifier<T> + 'static, concurrency: usize) -> Self {
        Self::build(Stage::Amplifier(Arc::new(amplifier)), concurrency, concurrency)
    }

    /// A terminal node; sink statuses are logged and not forwarded.
    ///
    /// To react to each status, wrap the sink before building the node:
    ///
    /// ```ignore
    /// let node = Node::sink(WithCallback::new(downloader, reactor), 2);
    /// ```
    ///
    /// The reactor then runs inside the same invocation and permit.
    pub fn sink(sink: impl Sink<T> + 'static, concurrency: usize) -> Self {
        Self::build(Stage::Sink(Arc::new(sink)), concurrency, concurrency)
    }

    /// Rebuilds the node with a different queue capacity.
    ///
    /// Call this before wiring or feeding the node. The successor carries
    /// over; anything already queued does not.
    pub fn with_capacity(self, capacity: usize) -> Self {
        let next = self.core.successor();
        let stage = match &self.core.stage {
            Stage::Source(s) => Stage::Source(Arc::clone(s)),
            Stage::Transform(s) => Stage::Transform(Arc::clone(s)),
            Stage::Amplifier(s) => Stage::Amplifier(Arc::clone(s)),
            Stage::Sink(s) => Stage::Sink(Arc::clone(s)),
        };
        let rebuilt = Self::build(stage, self.core.concurrency, capacity);
        rebuilt.core.set_successor(next);
        rebuilt
    }

    /// Sets the successor and returns it, so wiring reads left to right:
    /// `a.next(b).next(c)`.
    pub fn next<D>(&self, next: D) -> D
    where
        D: Downstream<T> + Clone + 'static,
    {
        self.core.set_successor(Arc::new(next.clone()));
        next
    }

    /// Accepts an optional item; `None` is a no-op.
    pub async fn accept_opt(&self, item: Option<T>) {
        if let Some(item) = item {
            self.accept(item).await;
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn concurrency(&self) -> usize {
        self.core.concurrency
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Stage invocations currently running.
    pub fn in_flight(&self) -> usize {
        self.core.in_flight.load(Ordering::Relaxed)
    }

    /// Items accepted but not yet fully processed.
    pub fn pending(&self) -> usize {
        self.queue.unfinished()
    }

    fn ensure_started(&self) {
        let receiver = match self.receiver.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(rx) = receiver {
            tokio::spawn(Arc::clone(&self.core).run_loop(rx));
        }
    }
}

#[async_trait]
impl<T: Item> Downstream<T> for Node<T> {
    async fn accept(&self, item: T) {
        self.ensure_started();
        if self.queue.push(item).await.is_err() {
            warn!("Node {} queue is closed, item dropped", self.core.name);
        }
    }

    /// Waits for this node's queue to be fully processed, then drains the
    /// successor. By then every output of this node has been accepted
    /// downstream, so nothing can arrive after the successor reports drained.
    async fn drain(&self) {
        self.queue.join().await;
        self.core.successor().drain().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::FnTransform;
    use crate::testing::{ConcurrencyProbe, PanickingTransform, RecordingSink, VecSource};
    use std::time::Duration;

    #[tokio::test]
    async fn test_transform_forwards_to_sink() {
        let sink = Arc::new(RecordingSink::new("collect"));
        let double = Node::transform(FnTransform::new("double", |n: u32| Some(n * 2)), 1);
        double.next(Node::sink(Arc::clone(&sink), 1));

        for n in 1..=3 {
            double.accept(n).await;
        }
        double.drain().await;

        assert_eq!(sink.items().await, vec![2, 4, 6]);
    }

    #[tokio::test]
    async fn test_transform_absent_drops_item() {
        let sink = Arc::new(RecordingSink::new("collect"));
        let odd = Node::transform(FnTransform::new("odd", |n: u32| (n % 2 == 1).then_some(n)), 2);
        odd.next(Node::sink(Arc::clone(&sink), 1));

        for n in 0..6 {
            odd.accept(n).await;
        }
        odd.drain().await;

        let mut items = sink.items().await;
        items.sort();
        assert_eq!(items, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn test_concurrency_limit_respected() {
        let probe = Arc::new(ConcurrencyProbe::new(Duration::from_millis(20)));
        let node = Node::sink(Arc::clone(&probe), 3);

        for n in 0..12u32 {
            node.accept(n).await;
        }
        node.drain().await;

        assert_eq!(probe.calls(), 12);
        assert!(probe.peak() <= 3, "peak was {}", probe.peak());
        assert!(probe.peak() >= 2, "expected some overlap, peak was {}", probe.peak());
        assert_eq!(node.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_drain_waits_for_slow_downstream() {
        let sink = Arc::new(RecordingSink::new("slow").with_delay(Duration::from_millis(30)));
        let pass = Node::transform(FnTransform::new("pass", |n: u32| Some(n)), 4);
        pass.next(Node::sink(Arc::clone(&sink), 1));

        for n in 0..5 {
            pass.accept(n).await;
        }
        pass.drain().await;

        assert_eq!(sink.items().await.len(), 5);
        assert_eq!(pass.pending(), 0);
    }

    #[tokio::test]
    async fn test_failing_stage_is_contained() {
        let sink = Arc::new(RecordingSink::new("collect"));
        let flaky = Node::transform(PanickingTransform::on(2), 1);
        flaky.next(Node::sink(Arc::clone(&sink), 1));

        for n in 1..=3u32 {
            flaky.accept(n).await;
        }
        flaky.drain().await;

        assert_eq!(sink.items().await, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_dangling_node_is_benign() {
        let lonely = Node::transform(FnTransform::new("lonely", |n: u32| Some(n)), 1);
        lonely.accept(1).await;
        lonely.accept_opt(None).await;
        lonely.drain().await;
        assert_eq!(lonely.pending(), 0);
    }

    #[tokio::test]
    async fn test_source_node_ignores_input() {
        let sink = Arc::new(RecordingSink::new("collect"));
        let source = Node::source(VecSource::new("numbers", vec![7u32, 8, 9]), 1);
        source.next(Node::sink(Arc::clone(&sink), 1));

        source.accept(0).await;
        source.drain().await;

        assert_eq!(sink.items().await, vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn test_with_capacity_keeps_successor() {
        let sink = Arc::new(RecordingSink::new("collect"));
        let node = Node::transform(FnTransform::new("pass", |n: u32| Some(n)), 2);
        node.next(Node::sink(Arc::clone(&sink), 1));
        let node = node.with_capacity(8);
        assert_eq!(node.capacity(), 8);
        assert_eq!(node.concurrency(), 2);

        node.accept(1).await;
        node.drain().await;
        assert_eq!(sink.items().await, vec![1]);
    }
}
