//! Pair implementation.
//!
//! Drives one feed-then-drain cycle at a time:
//! - Feed: every source runs concurrently, bounded by the feed limiter
//! - Download: every sink drains its own queue, bounded by the download limiter
//! - Drain: the next cycle starts only after every sink finished this one

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::config::PairConfig;
use crate::metrics::{CYCLES_TOTAL, CYCLE_DURATION};
use crate::queue::Envelope;
use crate::stage::{Item, Sink, Source};

use super::download::DownloadController;
use super::feed::FeedController;
use super::types::{CycleReport, PairError};

/// Sources and sinks run together on a schedule.
///
/// Configure with the `add_*` and `set_*` methods, then either call
/// [`run_once`](Pair::run_once) or hand the pair to a
/// [`Controller`](crate::Controller). Limiters are created fresh for each
/// cycle, so a changed concurrency takes effect on the next one.
pub struct Pair<T> {
    name: String,
    feeds: Vec<FeedController<T>>,
    downloads: Vec<DownloadController<T>>,
    initial_delay: Duration,
    interval: Duration,
    feed_concurrency: usize,
    download_concurrency: usize,
    queue_capacity: usize,
}

impl<T: Item> Default for Pair<T> {
    fn default() -> Self {
        Self::new(format!("pair-{}", uuid::Uuid::new_v4()))
    }
}

impl<T: Item> Pair<T> {
    /// Time between the end of one cycle and the start of the next.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30 * 60);
    pub const DEFAULT_CONCURRENCY: usize = 3;
    /// Queue capacity given to sinks added with [`add_sink`](Pair::add_sink).
    pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            feeds: Vec::new(),
            downloads: Vec::new(),
            initial_delay: Duration::ZERO,
            interval: Self::DEFAULT_INTERVAL,
            feed_concurrency: Self::DEFAULT_CONCURRENCY,
            download_concurrency: Self::DEFAULT_CONCURRENCY,
            queue_capacity: Self::DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Creates an empty pair with the timing and limits of `config`.
    pub fn from_config(config: &PairConfig) -> Self {
        let mut pair = Self::new(config.name.clone());
        pair.set_initial_delay(Duration::from_secs(config.initial_delay_secs))
            .set_interval(Duration::from_secs(config.interval_secs))
            .set_feed_concurrency(config.feed_concurrency)
            .set_download_concurrency(config.download_concurrency)
            .set_queue_capacity(config.queue_capacity);
        pair
    }

    pub fn add_source(&mut self, source: impl Source<T> + 'static) -> &mut Self {
        self.feeds.push(FeedController::new(source));
        self
    }

    pub fn add_sources<S>(&mut self, sources: impl IntoIterator<Item = S>) -> &mut Self
    where
        S: Source<T> + 'static,
    {
        self.feeds.extend(sources.into_iter().map(FeedController::new));
        self
    }

    /// Adds a sink with the pair's current queue capacity.
    pub fn add_sink(&mut self, sink: impl Sink<T> + 'static) -> &mut Self {
        let capacity = self.queue_capacity;
        self.add_sink_with_capacity(sink, capacity)
    }

    pub fn add_sink_with_capacity(
        &mut self,
        sink: impl Sink<T> + 'static,
        capacity: usize,
    ) -> &mut Self {
        self.downloads.push(DownloadController::new(sink, capacity));
        self
    }

    pub fn add_sinks<S>(&mut self, sinks: impl IntoIterator<Item = S>) -> &mut Self
    where
        S: Sink<T> + 'static,
    {
        for sink in sinks {
            self.add_sink(sink);
        }
        self
    }

    pub fn set_initial_delay(&mut self, delay: Duration) -> &mut Self {
        self.initial_delay = delay;
        self
    }

    pub fn set_interval(&mut self, interval: Duration) -> &mut Self {
        self.interval = interval;
        self
    }

    /// Maximum number of sources pulling at once.
    pub fn set_feed_concurrency(&mut self, n: usize) -> &mut Self {
        self.feed_concurrency = n;
        self
    }

    /// Maximum number of sink calls at once, across all sinks.
    pub fn set_download_concurrency(&mut self, n: usize) -> &mut Self {
        self.download_concurrency = n;
        self
    }

    /// Queue capacity for sinks added after this call.
    pub fn set_queue_capacity(&mut self, capacity: usize) -> &mut Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn feed_concurrency(&self) -> usize {
        self.feed_concurrency
    }

    pub fn download_concurrency(&self) -> usize {
        self.download_concurrency
    }

    pub fn source_count(&self) -> usize {
        self.feeds.len()
    }

    pub fn sink_count(&self) -> usize {
        self.downloads.len()
    }

    /// Runs one full cycle and returns once every sink has drained.
    ///
    /// Per-item and per-source failures are contained and show up in the
    /// report. An `Err` means the cycle as a whole could not run.
    pub async fn run_once(&self) -> Result<CycleReport, PairError> {
        let result = self.cycle().await;
        let label = if result.is_ok() { "ok" } else { "failed" };
        CYCLES_TOTAL.with_label_values(&[self.name.as_str(), label]).inc();
        result
    }

    async fn cycle(&self) -> Result<CycleReport, PairError> {
        self.validate()?;

        let started_at = Utc::now();
        let start = Instant::now();
        info!(
            "Pair {} cycle started with {} sources and {} sinks",
            self.name,
            self.feeds.len(),
            self.downloads.len()
        );

        let feed_permits = Semaphore::new(self.feed_concurrency);
        let download_permits = Arc::new(Semaphore::new(self.download_concurrency));

        // 1. Start every download loop; they idle until fed.
        let (queues, tasks): (Vec<_>, Vec<_>) = self
            .downloads
            .iter()
            .map(|d| d.start(&self.name, Arc::clone(&download_permits)))
            .unzip();

        // 2. Run every source to exhaustion.
        let feeds = join_all(
            self.feeds
                .iter()
                .map(|f| f.run(&self.name, &feed_permits, &queues)),
        )
        .await;

        // 3. One end-of-stream per sink, after all sources finished.
        for queue in &queues {
            if queue.push(Envelope::EndOfStream).await.is_err() {
                debug!("Pair {} sink queue already closed at end of stream", self.name);
            }
        }

        // 4. Wait until every sink processed everything.
        join_all(queues.iter().map(|q| q.join())).await;

        let mut sinks = Vec::with_capacity(tasks.len());
        for (download, task) in self.downloads.iter().zip(tasks) {
            let report = task.await.map_err(|e| PairError::SinkTaskFailed {
                pair: self.name.clone(),
                sink: download.name().to_string(),
                reason: e.to_string(),
            })?;
            sinks.push(report);
        }

        let elapsed = start.elapsed();
        CYCLE_DURATION
            .with_label_values(&[self.name.as_str()])
            .observe(elapsed.as_secs_f64());

        let report = CycleReport {
            pair: self.name.clone(),
            started_at,
            duration_ms: elapsed.as_millis() as u64,
            feeds,
            sinks,
        };
        info!(
            "Pair {} cycle finished in {:?}: {} items fed, {} consumed, {} failed",
            self.name,
            elapsed,
            report.items_fed(),
            report.items_consumed(),
            report.failures()
        );
        Ok(report)
    }

    fn validate(&self) -> Result<(), PairError> {
        if self.feed_concurrency == 0 {
            return Err(PairError::InvalidConcurrency {
                pair: self.name.clone(),
                side: "feed",
            });
        }
        if self.download_concurrency == 0 {
            return Err(PairError::InvalidConcurrency {
                pair: self.name.clone(),
                side: "download",
            });
        }
        if let Some(download) = self.downloads.iter().find(|d| d.capacity() == 0) {
            return Err(PairError::InvalidCapacity {
                pair: self.name.clone(),
                sink: download.name().to_string(),
            });
        }
        Ok(())
    }

    /// Runs one cycle, logging a whole-cycle failure instead of returning it.
    async fn tick(&self) {
        match AssertUnwindSafe(self.run_once()).catch_unwind().await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                error!("Pair {} cycle failed, retrying next tick: {}", self.name, e);
            }
            Err(_) => {
                CYCLES_TOTAL.with_label_values(&[self.name.as_str(), "failed"]).inc();
                error!("Pair {} cycle panicked, retrying next tick", self.name);
            }
        }
    }

    /// Waits the initial delay, then runs a cycle every interval, forever.
    ///
    /// The interval is measured from the end of one cycle to the start of the
    /// next. A failed cycle never stops the loop.
    pub async fn run_forever(&self) {
        if !self.initial_delay.is_zero() {
            info!("Pair {} waiting {:?} before the first cycle", self.name, self.initial_delay);
            tokio::time::sleep(self.initial_delay).await;
        }
        loop {
            self.tick().await;
            debug!("Pair {} sleeping {:?} until the next cycle", self.name, self.interval);
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, FailingSink, RecordingSink, VecSource};

    #[test]
    fn test_defaults() {
        let pair: Pair<u32> = Pair::default();
        assert!(pair.name().starts_with("pair-"));
        assert_eq!(pair.interval(), Duration::from_secs(1800));
        assert_eq!(pair.initial_delay(), Duration::ZERO);
        assert_eq!(pair.feed_concurrency(), 3);
        assert_eq!(pair.download_concurrency(), 3);
        assert_eq!(pair.source_count(), 0);
        assert_eq!(pair.sink_count(), 0);
    }

    #[test]
    fn test_from_config() {
        let mut config = fixtures::pair_config("news");
        config.initial_delay_secs = 7;
        let pair: Pair<u32> = Pair::from_config(&config);
        assert_eq!(pair.name(), "news");
        assert_eq!(pair.initial_delay(), Duration::from_secs(7));
        assert_eq!(pair.interval(), Duration::from_secs(5));
        assert_eq!(pair.feed_concurrency(), 2);
    }

    #[tokio::test]
    async fn test_run_once_reports_cycle() {
        let sink = Arc::new(RecordingSink::new("collect"));
        let mut pair = Pair::new("report");
        pair.add_source(VecSource::new("numbers", vec![1u32, 2, 3]))
            .add_sink(Arc::clone(&sink))
            .add_sink(FailingSink::new());

        let report = pair.run_once().await.unwrap();
        assert_eq!(report.pair, "report");
        assert_eq!(report.items_fed(), 3);
        assert_eq!(report.items_consumed(), 6);
        assert_eq!(report.sink("collect").unwrap().succeeded, 3);
        assert_eq!(report.sink("failing-sink").unwrap().failed, 3);
        assert_eq!(sink.items().await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_zero_concurrency_fails_cycle() {
        let mut pair: Pair<u32> = Pair::new("broken");
        pair.set_download_concurrency(0);
        let err = pair.run_once().await.unwrap_err();
        assert!(matches!(
            err,
            PairError::InvalidConcurrency { side: "download", .. }
        ));
    }

    #[tokio::test]
    async fn test_zero_capacity_fails_cycle() {
        let mut pair = Pair::new("broken");
        pair.add_sink_with_capacity(RecordingSink::<u32>::new("tiny"), 0);
        let err = pair.run_once().await.unwrap_err();
        assert!(matches!(err, PairError::InvalidCapacity { ref sink, .. } if sink == "tiny"));
    }

    #[tokio::test]
    async fn test_empty_pair_completes() {
        let pair: Pair<u32> = Pair::new("empty");
        let report = pair.run_once().await.unwrap();
        assert_eq!(report.items_fed(), 0);
        assert!(report.sinks.is_empty());
    }

    #[tokio::test]
    async fn test_queue_capacity_applies_to_later_sinks() {
        let mut pair = Pair::new("caps");
        pair.set_queue_capacity(1);
        pair.add_sink(RecordingSink::<u32>::new("small"));
        pair.add_source(VecSource::new("numbers", (0..20u32).collect()));

        let report = pair.run_once().await.unwrap();
        assert_eq!(report.sink("small").unwrap().consumed, 20);
    }
}
