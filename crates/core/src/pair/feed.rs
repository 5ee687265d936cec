//! Feed side of a pair.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::metrics::{record_stage_failure, ITEMS_FED};
use crate::queue::{Envelope, QueueHandle};
use crate::stage::{next_contained, open_contained, Item, Source};

use super::types::FeedReport;

/// Pulls items from one source and copies each into every sink queue.
pub struct FeedController<T> {
    source: Arc<dyn Source<T>>,
}

impl<T> Clone for FeedController<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

impl<T: Item> FeedController<T> {
    pub fn new(source: impl Source<T> + 'static) -> Self {
        Self {
            source: Arc::new(source),
        }
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    /// Runs the source to exhaustion.
    ///
    /// Each pull holds one permit of `permits`; the permit is released before
    /// the item is pushed, so a full sink queue never pins a feed permit.
    /// Items reach every queue in production order.
    pub async fn run(
        &self,
        pair: &str,
        permits: &Semaphore,
        queues: &[QueueHandle<Envelope<T>>],
    ) -> FeedReport {
        let mut report = FeedReport {
            source: self.name().to_string(),
            ..Default::default()
        };
        let mut stream = open_contained(|| self.source.produce());

        loop {
            let next = {
                let _permit = match permits.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                next_contained(&mut stream).await
            };

            match next {
                None => break,
                Some(Ok(item)) => {
                    debug!("Pair {} source {} produced {:?}", pair, self.name(), item);
                    report.fed += 1;
                    ITEMS_FED.with_label_values(&[pair]).inc();
                    for queue in queues {
                        if queue.push(Envelope::Item(item.clone())).await.is_err() {
                            warn!(
                                "Pair {} sink queue closed, {:?} from {} not delivered",
                                pair,
                                item,
                                self.name()
                            );
                        }
                    }
                }
                Some(Err(e)) => {
                    record_stage_failure("source");
                    report.failed = true;
                    if e.is_panic() {
                        error!("Pair {} source {} panicked, it ends early: {}", pair, self.name(), e);
                    } else {
                        warn!("Pair {} source {} failed, it ends early: {}", pair, self.name(), e);
                    }
                    break;
                }
            }
        }

        debug!("Pair {} source {} done after {} items", pair, self.name(), report.fed);
        report
    }
}
