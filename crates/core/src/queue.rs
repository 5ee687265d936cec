//! Bounded work queue with completion tracking.
//!
//! A `WorkQueue` is a fixed-capacity FIFO: `push` suspends while the queue is
//! full and `pop` suspends while it is empty. On top of that it counts
//! *unfinished* entries, the ones pushed but not yet fully handled. Every popped
//! entry comes with a [`Done`] guard; dropping the guard marks the entry as
//! processed, and [`QueueHandle::join`] resolves once nothing is unfinished.
//!
//! The guard is dropped on unwind too, and a dropped receiver releases
//! whatever was still buffered, so a panicking consumer can never wedge a
//! `join`.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

/// Entry type for queues that need an explicit end-of-stream marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope<T> {
    /// A real item.
    Item(T),
    /// No more items will arrive this cycle.
    EndOfStream,
}

/// Returned by [`QueueHandle::push`] when the consumer side is gone.
#[derive(Debug, thiserror::Error)]
#[error("work queue closed")]
pub struct QueueClosed<T>(pub T);

/// Shared unfinished-entry counter.
#[derive(Debug)]
struct Tracker {
    unfinished: watch::Sender<usize>,
}

impl Tracker {
    fn new() -> Self {
        let (unfinished, _) = watch::channel(0);
        Self { unfinished }
    }

    fn increment(&self) {
        self.unfinished.send_modify(|n| *n += 1);
    }

    fn decrement(&self) {
        self.unfinished.send_modify(|n| *n = n.saturating_sub(1));
    }

    fn current(&self) -> usize {
        *self.unfinished.borrow()
    }

    async fn wait_idle(&self) {
        let mut rx = self.unfinished.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// Creates a bounded work queue.
///
/// A capacity of zero is bumped to one; tokio channels need at least one slot.
pub fn work_queue<T>(capacity: usize) -> (QueueHandle<T>, QueueReceiver<T>) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let tracker = Arc::new(Tracker::new());
    (
        QueueHandle {
            tx,
            tracker: Arc::clone(&tracker),
            capacity,
        },
        QueueReceiver { rx, tracker },
    )
}

/// Producer side of a work queue. Cheap to clone.
#[derive(Debug)]
pub struct QueueHandle<T> {
    tx: mpsc::Sender<T>,
    tracker: Arc<Tracker>,
    capacity: usize,
}

impl<T> Clone for QueueHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            tracker: Arc::clone(&self.tracker),
            capacity: self.capacity,
        }
    }
}

impl<T> QueueHandle<T> {
    /// Enqueues an entry, waiting for a free slot if the queue is full.
    pub async fn push(&self, entry: T) -> Result<(), QueueClosed<T>> {
        // Counted before the send so a concurrent join cannot slip past an
        // entry that is waiting for a slot.
        self.tracker.increment();
        match self.tx.send(entry).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(entry)) => {
                self.tracker.decrement();
                Err(QueueClosed(entry))
            }
        }
    }

    /// Waits until every entry pushed so far has been popped and released.
    pub async fn join(&self) {
        self.tracker.wait_idle().await;
    }

    /// Entries pushed but not yet released.
    pub fn unfinished(&self) -> usize {
        self.tracker.current()
    }

    /// Entries currently sitting in the queue.
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Consumer side of a work queue.
#[derive(Debug)]
pub struct QueueReceiver<T> {
    rx: mpsc::Receiver<T>,
    tracker: Arc<Tracker>,
}

impl<T> QueueReceiver<T> {
    /// Takes the next entry, waiting while the queue is empty.
    ///
    /// Returns `None` once every handle has been dropped and the queue is
    /// empty.
    pub async fn pop(&mut self) -> Option<(T, Done)> {
        let entry = self.rx.recv().await?;
        Some((
            entry,
            Done {
                tracker: Arc::clone(&self.tracker),
            },
        ))
    }
}

/// Entries still buffered when the consumer goes away will never be popped,
/// so they are released here. Pending and later pushes fail with
/// [`QueueClosed`] and release themselves.
impl<T> Drop for QueueReceiver<T> {
    fn drop(&mut self) {
        self.rx.close();
        while self.rx.try_recv().is_ok() {
            self.tracker.decrement();
        }
    }
}

/// Marks one popped entry as processed when dropped.
#[derive(Debug)]
#[must_use = "dropping the guard immediately marks the entry as processed"]
pub struct Done {
    tracker: Arc<Tracker>,
}

impl Drop for Done {
    fn drop(&mut self) {
        self.tracker.decrement();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn test_push_pop_fifo() {
        let (handle, mut rx) = work_queue(4);
        for i in 0..3 {
            handle.push(i).await.unwrap();
        }
        assert_eq!(handle.len(), 3);
        for expected in 0..3 {
            let (item, _done) = rx.pop().await.unwrap();
            assert_eq!(item, expected);
        }
    }

    #[tokio::test]
    async fn test_push_blocks_when_full() {
        let (handle, mut rx) = work_queue(2);
        handle.push(1).await.unwrap();
        handle.push(2).await.unwrap();

        let mut third = task::spawn(handle.push(3));
        assert_pending!(third.poll());

        let (first, done) = rx.pop().await.unwrap();
        assert_eq!(first, 1);
        drop(done);

        assert!(third.is_woken());
        assert_ready!(third.poll()).unwrap();
        assert_eq!(handle.len(), 2);
    }

    #[tokio::test]
    async fn test_join_waits_for_release() {
        let (handle, mut rx) = work_queue(4);
        handle.push("a").await.unwrap();
        handle.push("b").await.unwrap();
        assert_eq!(handle.unfinished(), 2);

        let (_, done_a) = rx.pop().await.unwrap();
        let (_, done_b) = rx.pop().await.unwrap();

        let mut join = task::spawn(handle.join());
        assert_pending!(join.poll());

        drop(done_a);
        assert_pending!(join.poll());
        drop(done_b);
        assert_ready!(join.poll());
        assert_eq!(handle.unfinished(), 0);
    }

    #[tokio::test]
    async fn test_join_on_empty_queue_returns() {
        let (handle, _rx) = work_queue::<u8>(1);
        tokio::time::timeout(Duration::from_millis(100), handle.join())
            .await
            .expect("join on an empty queue should not block");
    }

    #[tokio::test]
    async fn test_push_after_receiver_dropped() {
        let (handle, rx) = work_queue(1);
        drop(rx);
        let err = handle.push(5).await.unwrap_err();
        assert_eq!(err.0, 5);
        assert_eq!(handle.unfinished(), 0);
    }

    #[tokio::test]
    async fn test_pop_returns_none_when_handles_dropped() {
        let (handle, mut rx) = work_queue::<u8>(1);
        drop(handle);
        assert!(rx.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_done_released_on_panic() {
        let (handle, mut rx) = work_queue(1);
        handle.push(1u8).await.unwrap();
        let (_, done) = rx.pop().await.unwrap();

        let result = tokio::spawn(async move {
            let _done = done;
            panic!("consumer failed");
        })
        .await;
        assert!(result.is_err());
        assert_eq!(handle.unfinished(), 0);
    }

    #[tokio::test]
    async fn test_dropped_receiver_releases_buffered_entries() {
        let (handle, mut rx) = work_queue(4);
        for i in 0..3u8 {
            handle.push(i).await.unwrap();
        }
        let (_, done) = rx.pop().await.unwrap();

        drop(rx);
        assert_eq!(handle.unfinished(), 1);

        let mut join = task::spawn(handle.join());
        assert_pending!(join.poll());
        drop(done);
        assert_ready!(join.poll());
    }

    #[tokio::test]
    async fn test_dropped_receiver_fails_waiting_push() {
        let (handle, rx) = work_queue(1);
        handle.push(1u8).await.unwrap();

        let mut blocked = task::spawn(handle.push(2));
        assert_pending!(blocked.poll());

        drop(rx);
        assert!(blocked.is_woken());
        let err = assert_ready!(blocked.poll()).unwrap_err();
        assert_eq!(err.0, 2);
        assert_eq!(handle.unfinished(), 0);
    }

    #[test]
    fn test_zero_capacity_is_bumped() {
        let (handle, _rx) = work_queue::<u8>(0);
        assert_eq!(handle.capacity(), 1);
    }
}
