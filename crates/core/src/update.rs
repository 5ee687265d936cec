//! Update markers: download an item only when it changed since the last
//! successful download.
//!
//! An [`UpdateStore`] answers two questions about an item: does it need an
//! update, and record that it was updated. [`update_sink`] wraps any sink so
//! that unchanged items are skipped and successful downloads are recorded.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::decorate::{WithCallback, WithFilter};
use crate::stage::{BoxError, Item, Reactor, Sink, StageError, Status, Transform};

/// Errors from an update store.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("update store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Other(#[from] BoxError),
}

/// Reads and writes update markers for items.
#[async_trait]
pub trait UpdateStore<T>: Send + Sync {
    /// Whether the item changed since it was last recorded.
    async fn read(&self, item: &T) -> Result<bool, UpdateError>;

    /// Records the item's current marker. Returns whether anything was written.
    async fn write(&self, item: &T) -> Result<bool, UpdateError>;
}

#[async_trait]
impl<T: Sync + 'static, U: UpdateStore<T> + ?Sized> UpdateStore<T> for Arc<U> {
    async fn read(&self, item: &T) -> Result<bool, UpdateError> {
        (**self).read(item).await
    }

    async fn write(&self, item: &T) -> Result<bool, UpdateError> {
        (**self).write(item).await
    }
}

/// Drops items whose marker has not changed.
///
/// A store that cannot be read lets the item through.
pub struct UpdateFilter<U> {
    store: U,
}

impl<U> UpdateFilter<U> {
    pub fn new(store: U) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<T: Item, U: UpdateStore<T>> Transform<T> for UpdateFilter<U> {
    fn name(&self) -> &str {
        "update-filter"
    }

    async fn apply(&self, item: T) -> Result<Option<T>, StageError> {
        match self.store.read(&item).await {
            Ok(true) => {
                info!("Item will be downloaded: {:?}", item);
                Ok(Some(item))
            }
            Ok(false) => {
                info!("Item will be skipped: {:?}", item);
                Ok(None)
            }
            Err(e) => {
                error!("Failed to read update marker, item will be downloaded: {:?}: {}", item, e);
                Ok(Some(item))
            }
        }
    }
}

/// Records the marker of every successfully downloaded item.
pub struct UpdateReactor<U> {
    store: U,
}

impl<U> UpdateReactor<U> {
    pub fn new(store: U) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<T: Item, U: UpdateStore<T>> Reactor<T> for UpdateReactor<U> {
    fn name(&self) -> &str {
        "update-reactor"
    }

    async fn react(&self, item: &T, status: Status) -> Result<Status, StageError> {
        if !status.is_success() {
            info!("Download ended with {}, update marker not written: {:?}", status, item);
            return Ok(status);
        }
        match self.store.write(item).await {
            Ok(true) => info!("Update marker written: {:?}", item),
            Ok(false) => info!("Update marker not written: {:?}", item),
            Err(e) => error!("Failed to write update marker for {:?}: {}", item, e),
        }
        Ok(status)
    }
}

/// A sink wrapped with update tracking.
pub type UpdateSink<S, U> = WithCallback<WithFilter<S, UpdateFilter<Arc<U>>>, UpdateReactor<Arc<U>>>;

/// Wraps `sink` so that unchanged items are skipped and successful
/// downloads are recorded in `store`.
pub fn update_sink<T, S, U>(sink: S, store: Arc<U>) -> UpdateSink<S, U>
where
    T: Item,
    S: Sink<T>,
    U: UpdateStore<T> + ?Sized,
{
    WithCallback::new(
        WithFilter::new(sink, UpdateFilter::new(Arc::clone(&store))),
        UpdateReactor::new(store),
    )
}

type KeyFn<T> = Box<dyn Fn(&T) -> Option<(String, String)> + Send + Sync>;

/// In-memory update store keyed by a function of the item.
///
/// The key function returns the item's identity and its current tag. An item
/// needs an update when its tag differs from the recorded one. Items without
/// a key always pass and are never recorded.
pub struct MemoryUpdateStore<T> {
    key_fn: KeyFn<T>,
    tags: RwLock<HashMap<String, String>>,
}

impl<T: Item> MemoryUpdateStore<T> {
    pub fn new(key_fn: impl Fn(&T) -> Option<(String, String)> + Send + Sync + 'static) -> Self {
        Self {
            key_fn: Box::new(key_fn),
            tags: RwLock::new(HashMap::new()),
        }
    }

    /// The tag recorded for `key`, if any.
    pub async fn recorded(&self, key: &str) -> Option<String> {
        self.tags.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.tags.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tags.read().await.is_empty()
    }
}

#[async_trait]
impl<T: Item> UpdateStore<T> for MemoryUpdateStore<T> {
    async fn read(&self, item: &T) -> Result<bool, UpdateError> {
        let Some((key, tag)) = (self.key_fn)(item) else {
            debug!("Item has no update key, it needs an update: {:?}", item);
            return Ok(true);
        };
        let last = self.tags.read().await.get(&key).cloned();
        debug!("Update tag for {} is {}, last recorded {:?}", key, tag, last);
        Ok(last.as_deref() != Some(tag.as_str()))
    }

    async fn write(&self, item: &T) -> Result<bool, UpdateError> {
        let Some((key, tag)) = (self.key_fn)(item) else {
            return Ok(false);
        };
        self.tags.write().await.insert(key, tag);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;

    #[derive(Debug, Clone, PartialEq)]
    struct Page {
        url: &'static str,
        etag: &'static str,
    }

    fn page(url: &'static str, etag: &'static str) -> Page {
        Page { url, etag }
    }

    fn page_store() -> Arc<MemoryUpdateStore<Page>> {
        Arc::new(MemoryUpdateStore::new(|p: &Page| {
            (!p.url.is_empty()).then(|| (p.url.to_string(), p.etag.to_string()))
        }))
    }

    struct BrokenStore;

    #[async_trait]
    impl UpdateStore<Page> for BrokenStore {
        async fn read(&self, _item: &Page) -> Result<bool, UpdateError> {
            Err(UpdateError::Unavailable("disk gone".into()))
        }

        async fn write(&self, _item: &Page) -> Result<bool, UpdateError> {
            Err(UpdateError::Unavailable("disk gone".into()))
        }
    }

    #[tokio::test]
    async fn test_memory_store_detects_changes() {
        let store = page_store();
        let a1 = page("a", "v1");
        assert!(store.read(&a1).await.unwrap());
        assert!(store.write(&a1).await.unwrap());
        assert!(!store.read(&a1).await.unwrap());
        assert!(store.read(&page("a", "v2")).await.unwrap());
        assert_eq!(store.recorded("a").await.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn test_memory_store_keyless_items() {
        let store = page_store();
        let keyless = page("", "v1");
        assert!(store.read(&keyless).await.unwrap());
        assert!(!store.write(&keyless).await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_update_sink_skips_unchanged_items() {
        let store = page_store();
        let sink = Arc::new(RecordingSink::new("fetch"));
        let guarded = update_sink(Arc::clone(&sink), Arc::clone(&store));

        assert_eq!(guarded.consume(page("a", "v1")).await.unwrap(), Status::Success);
        assert_eq!(guarded.consume(page("a", "v1")).await.unwrap(), Status::Skipped);
        assert_eq!(guarded.consume(page("a", "v2")).await.unwrap(), Status::Success);

        assert_eq!(sink.items().await, vec![page("a", "v1"), page("a", "v2")]);
        assert_eq!(store.recorded("a").await.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_update_sink_records_only_success() {
        let store = page_store();
        let sink = RecordingSink::new("fetch").with_status(Status::Code(1));
        let guarded = update_sink(sink, Arc::clone(&store));

        assert_eq!(guarded.consume(page("a", "v1")).await.unwrap(), Status::Code(1));
        assert!(store.recorded("a").await.is_none());
        assert_eq!(guarded.consume(page("a", "v1")).await.unwrap(), Status::Code(1));
    }

    #[tokio::test]
    async fn test_unreadable_store_lets_items_through() {
        let sink = Arc::new(RecordingSink::new("fetch"));
        let guarded = update_sink(Arc::clone(&sink), Arc::new(BrokenStore));

        assert_eq!(guarded.consume(page("a", "v1")).await.unwrap(), Status::Success);
        assert_eq!(guarded.consume(page("a", "v1")).await.unwrap(), Status::Success);
        assert_eq!(sink.items().await.len(), 2);
    }
}
