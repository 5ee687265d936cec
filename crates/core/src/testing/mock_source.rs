//! Mock sources for testing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::time::Instant;

use crate::stage::{Item, Source, StageError};

/// Yields a fixed list of items on every run.
///
/// Records how many times it was started and when, which makes it useful
/// for checking scheduling as well as data flow.
///
/// # Example
///
/// ```rust,ignore
/// use simplarchiver_core::testing::VecSource;
///
/// let source = Arc::new(VecSource::new("numbers", vec![1, 2, 3]));
/// pair.add_source(Arc::clone(&source));
/// pair.run_once().await?;
/// assert_eq!(source.runs(), 1);
/// ```
#[derive(Debug)]
pub struct VecSource<T> {
    name: String,
    items: Vec<T>,
    delay: Duration,
    runs: AtomicUsize,
    started: Mutex<Vec<Instant>>,
}

impl<T: Item> VecSource<T> {
    pub fn new(name: impl Into<String>, items: Vec<T>) -> Self {
        Self {
            name: name.into(),
            items,
            delay: Duration::ZERO,
            runs: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
        }
    }

    /// A source that yields nothing.
    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    /// Sleep this long before each item.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of times `produce` was called.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// When each run started.
    pub fn run_instants(&self) -> Vec<Instant> {
        self.started.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl<T: Item> Source<T> for VecSource<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&self) -> BoxStream<'_, Result<T, StageError>> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut started) = self.started.lock() {
            started.push(Instant::now());
        }
        let delay = self.delay;
        stream::iter(self.items.clone())
            .then(move |item| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(item)
            })
            .boxed()
    }
}

/// Yields `ok_items` and then fails with an error.
#[derive(Debug)]
pub struct FailingSource<T> {
    name: String,
    ok_items: Vec<T>,
}

impl<T: Item> FailingSource<T> {
    pub fn new(name: impl Into<String>, ok_items: Vec<T>) -> Self {
        Self {
            name: name.into(),
            ok_items,
        }
    }
}

impl<T: Item> Source<T> for FailingSource<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&self) -> BoxStream<'_, Result<T, StageError>> {
        let name = self.name.clone();
        stream::iter(self.ok_items.clone().into_iter().map(Ok))
            .chain(stream::once(async move {
                Err(StageError::msg(format!("{} lost its connection", name)))
            }))
            .boxed()
    }
}

/// Yields `ok_items` and then panics while producing the next one.
#[derive(Debug)]
pub struct PanickingSource<T> {
    name: String,
    ok_items: Vec<T>,
}

impl<T: Item> PanickingSource<T> {
    pub fn new(name: impl Into<String>, ok_items: Vec<T>) -> Self {
        Self {
            name: name.into(),
            ok_items,
        }
    }
}

impl<T: Item> Source<T> for PanickingSource<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&self) -> BoxStream<'_, Result<T, StageError>> {
        let total = self.ok_items.len();
        stream::iter(self.ok_items.clone().into_iter().map(Some).chain([None]))
            .enumerate()
            .map(move |(i, item)| match item {
                Some(item) => Ok(item),
                None => panic!("source gave up after {} of {} items", i, total),
            })
            .boxed()
    }
}
