//! Stand-in stages for running the daemon without real feeds or downloaders.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::info;

use simplarchiver_core::{Item, Reactor, Sink, Source, StageError, Status};

/// Sleeps before each item and yields descriptive strings.
#[derive(Debug)]
pub struct SleepSource {
    name: String,
    count: usize,
    delay: Duration,
}

impl SleepSource {
    pub fn new(name: impl Into<String>, count: usize, delay: Duration) -> Self {
        Self {
            name: name.into(),
            count,
            delay,
        }
    }
}

impl Source<String> for SleepSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&self) -> BoxStream<'_, Result<String, StageError>> {
        let delay = self.delay;
        let name = self.name.clone();
        stream::iter(0..self.count)
            .then(move |i| {
                let name = name.clone();
                async move {
                    tokio::time::sleep(delay).await;
                    let item = format!("item(i={}, source={})", i, name);
                    info!("SleepSource {} woke up and produced {}", name, item);
                    Ok(item)
                }
            })
            .boxed()
    }
}

/// Logs each item and reports success.
#[derive(Debug)]
pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl<T: Item> Sink<T> for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn consume(&self, item: T) -> Result<Status, StageError> {
        info!("LogSink {} got an item: {:?}", self.name, item);
        Ok(Status::Success)
    }
}

/// Logs each outcome and passes the status through.
#[derive(Debug, Default)]
pub struct LogReactor;

#[async_trait]
impl<T: Item> Reactor<T> for LogReactor {
    fn name(&self) -> &str {
        "log-reactor"
    }

    async fn react(&self, item: &T, status: Status) -> Result<Status, StageError> {
        info!("LogReactor got an item {:?} and its return code {}", item, status);
        Ok(status)
    }
}
