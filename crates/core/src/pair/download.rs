//! Download side of a pair.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::metrics::{record_stage_failure, DOWNLOADS_IN_FLIGHT, SINK_RESULTS};
use crate::queue::{work_queue, Envelope, QueueHandle, QueueReceiver};
use crate::stage::{contain, Item, Sink};

use super::types::SinkReport;

/// Feeds one sink from its own bounded queue.
///
/// Items are consumed one at a time in queue order. Each consume holds one
/// permit of the pair-wide download limiter, so the limiter caps concurrent
/// downloads across every sink of the pair.
pub struct DownloadController<T> {
    sink: Arc<dyn Sink<T>>,
    capacity: usize,
}

impl<T> Clone for DownloadController<T> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            capacity: self.capacity,
        }
    }
}

impl<T: Item> DownloadController<T> {
    pub fn new(sink: impl Sink<T> + 'static, capacity: usize) -> Self {
        Self {
            sink: Arc::new(sink),
            capacity,
        }
    }

    pub fn name(&self) -> &str {
        self.sink.name()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Opens a fresh queue and spawns the download loop on it.
    ///
    /// The loop idles until fed and exits after it pops
    /// [`Envelope::EndOfStream`]. Join the returned queue handle to wait
    /// until everything pushed so far has been consumed.
    pub fn start(
        &self,
        pair: &str,
        permits: Arc<Semaphore>,
    ) -> (QueueHandle<Envelope<T>>, JoinHandle<SinkReport>) {
        let (queue, rx) = work_queue(self.capacity);
        let task = tokio::spawn(download_loop(
            pair.to_string(),
            Arc::clone(&self.sink),
            rx,
            permits,
        ));
        (queue, task)
    }
}

async fn download_loop<T: Item>(
    pair: String,
    sink: Arc<dyn Sink<T>>,
    mut rx: QueueReceiver<Envelope<T>>,
    permits: Arc<Semaphore>,
) -> SinkReport {
    let mut report = SinkReport::new(sink.name());
    debug!("Pair {} download loop for {} started", pair, sink.name());

    while let Some((entry, done)) = rx.pop().await {
        let item = match entry {
            Envelope::Item(item) => item,
            Envelope::EndOfStream => {
                drop(done);
                break;
            }
        };

        let permit = match permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!("Pair {} download limiter closed, {} stops", pair, sink.name());
                break;
            }
        };

        debug!("Pair {} sink {} consuming {:?}", pair, sink.name(), item);
        let in_flight = DOWNLOADS_IN_FLIGHT.with_label_values(&[pair.as_str()]);
        in_flight.inc();
        let outcome = contain(sink.consume(item)).await;
        in_flight.dec();
        drop(permit);

        match &outcome {
            Ok(status) if status.is_success() => {
                debug!("Pair {} sink {} finished: {}", pair, sink.name(), status);
            }
            Ok(status) => {
                warn!("Pair {} sink {} finished: {}", pair, sink.name(), status);
            }
            Err(e) => {
                record_stage_failure("sink");
                if e.is_panic() {
                    error!("Pair {} sink {} panicked, item not retried: {}", pair, sink.name(), e);
                } else {
                    warn!("Pair {} sink {} failed, item not retried: {}", pair, sink.name(), e);
                }
            }
        }
        let label = match &outcome {
            Ok(status) => status.label(),
            Err(_) => "error",
        };
        SINK_RESULTS.with_label_values(&[pair.as_str(), label]).inc();
        report.record(&outcome);
        drop(done);
    }

    debug!(
        "Pair {} download loop for {} stopped after {} items",
        pair,
        sink.name(),
        report.consumed
    );
    report
}
