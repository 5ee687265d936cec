//! Mock sinks and transforms for testing.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::stage::{Item, Sink, StageError, Status, Transform};

/// Tracks how many callers are inside a section at once, and the peak.
///
/// Share one gauge between several sinks to observe a limit that spans them.
#[derive(Debug, Default)]
pub struct PeakGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl PeakGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Records every consumed item in order.
///
/// Provides controllable behavior for testing:
/// - Simulated consume duration
/// - Configurable status to report
/// - Optional shared [`PeakGauge`] to observe concurrency
#[derive(Debug)]
pub struct RecordingSink<T> {
    label: String,
    items: RwLock<Vec<T>>,
    delay: Duration,
    status: Status,
    gauge: Arc<PeakGauge>,
}

impl<T: Item> RecordingSink<T> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            items: RwLock::new(Vec::new()),
            delay: Duration::ZERO,
            status: Status::Success,
            gauge: Arc::new(PeakGauge::new()),
        }
    }

    /// Simulated time spent consuming each item.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Status reported for every item.
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Counts concurrent calls on a gauge shared with other sinks.
    pub fn with_gauge(mut self, gauge: Arc<PeakGauge>) -> Self {
        self.gauge = gauge;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Items consumed so far, in completion order.
    pub async fn items(&self) -> Vec<T> {
        self.items.read().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.items.read().await.len()
    }

    /// Highest number of concurrent `consume` calls observed on the gauge.
    pub fn peak(&self) -> usize {
        self.gauge.peak()
    }
}

#[async_trait]
impl<T: Item> Sink<T> for RecordingSink<T> {
    fn name(&self) -> &str {
        &self.label
    }

    async fn consume(&self, item: T) -> Result<Status, StageError> {
        self.gauge.enter();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.items.write().await.push(item);
        self.gauge.exit();
        Ok(self.status.clone())
    }
}

/// Fails on every item, counting the attempts.
#[derive(Debug, Default)]
pub struct FailingSink {
    attempts: AtomicUsize,
}

impl FailingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Item> Sink<T> for FailingSink {
    fn name(&self) -> &str {
        "failing-sink"
    }

    async fn consume(&self, item: T) -> Result<Status, StageError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StageError::msg(format!("refusing to download {:?}", item)))
    }
}

/// Panics on every item.
#[derive(Debug, Default)]
pub struct PanickingSink;

#[async_trait]
impl<T: Item> Sink<T> for PanickingSink {
    fn name(&self) -> &str {
        "panicking-sink"
    }

    async fn consume(&self, item: T) -> Result<Status, StageError> {
        panic!("sink exploded on {:?}", item);
    }
}

/// Sleeps for a fixed time per item while tracking concurrency.
#[derive(Debug)]
pub struct ConcurrencyProbe {
    delay: Duration,
    calls: AtomicUsize,
    gauge: Arc<PeakGauge>,
}

impl ConcurrencyProbe {
    pub fn new(delay: Duration) -> Self {
        Self::with_gauge(delay, Arc::new(PeakGauge::new()))
    }

    pub fn with_gauge(delay: Duration, gauge: Arc<PeakGauge>) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
            gauge,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.gauge.peak()
    }
}

#[async_trait]
impl<T: Item> Sink<T> for ConcurrencyProbe {
    fn name(&self) -> &str {
        "concurrency-probe"
    }

    async fn consume(&self, _item: T) -> Result<Status, StageError> {
        self.gauge.enter();
        tokio::time::sleep(self.delay).await;
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gauge.exit();
        Ok(Status::Success)
    }
}

/// Passes items through unchanged, except one value that makes it panic.
#[derive(Debug)]
pub struct PanickingTransform<T> {
    trigger: T,
    _marker: PhantomData<fn(T)>,
}

impl<T: Item + PartialEq> PanickingTransform<T> {
    pub fn on(trigger: T) -> Self {
        Self {
            trigger,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Item + PartialEq> Transform<T> for PanickingTransform<T> {
    fn name(&self) -> &str {
        "panicking-transform"
    }

    async fn apply(&self, item: T) -> Result<Option<T>, StageError> {
        if item == self.trigger {
            panic!("transform choked on {:?}", item);
        }
        Ok(Some(item))
    }
}
