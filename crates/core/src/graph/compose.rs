//! Linear and fan-out composition.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::future::join_all;
use tracing::warn;

use crate::stage::Item;

use super::{Dangling, Downstream, Node};

/// Copies every accepted item to all of its successors.
///
/// `accept` completes only after every successor accepted its copy, so the
/// slowest branch sets the pace and no branch ever misses an item.
pub struct Branch<T> {
    successors: Arc<RwLock<Vec<Arc<dyn Downstream<T>>>>>,
}

impl<T> Clone for Branch<T> {
    fn clone(&self) -> Self {
        Self {
            successors: Arc::clone(&self.successors),
        }
    }
}

impl<T: Item> Default for Branch<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> Branch<T> {
    pub fn new() -> Self {
        Self {
            successors: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Adds a successor and returns the branch for further `next` calls.
    pub fn next<D>(&self, next: D) -> Self
    where
        D: Downstream<T> + 'static,
    {
        match self.successors.write() {
            Ok(mut guard) => guard.push(Arc::new(next)),
            Err(poisoned) => poisoned.into_inner().push(Arc::new(next)),
        }
        self.clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn Downstream<T>>> {
        match self.successors.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl<T: Item> Downstream<T> for Branch<T> {
    async fn accept(&self, item: T) {
        let successors = self.snapshot();
        if successors.is_empty() {
            warn!("Branch has no successors, item {:?} ends here", item);
            return;
        }
        join_all(successors.iter().map(|s| s.accept(item.clone()))).await;
    }

    async fn drain(&self) {
        let successors = self.snapshot();
        join_all(successors.iter().map(|s| s.drain())).await;
    }
}

/// Nodes wired head to tail.
pub struct Chain<T> {
    nodes: Vec<Node<T>>,
}

impl<T> Clone for Chain<T> {
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
        }
    }
}

impl<T: Item> Chain<T> {
    /// Wires each node to the one after it.
    pub fn new(nodes: Vec<Node<T>>) -> Self {
        for pair in nodes.windows(2) {
            pair[0].next(pair[1].clone());
        }
        Self { nodes }
    }

    pub fn head(&self) -> Option<&Node<T>> {
        self.nodes.first()
    }

    pub fn tail(&self) -> Option<&Node<T>> {
        self.nodes.last()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Attaches a successor to the tail and returns it.
    pub fn next<D>(&self, next: D) -> D
    where
        D: Downstream<T> + Clone + 'static,
    {
        match self.tail() {
            Some(tail) => tail.next(next),
            None => {
                warn!("Chain is empty, successor is not attached");
                next
            }
        }
    }
}

#[async_trait]
impl<T: Item> Downstream<T> for Chain<T> {
    async fn accept(&self, item: T) {
        match self.head() {
            Some(head) => head.accept(item).await,
            None => Dangling::new("empty chain").accept(item).await,
        }
    }

    async fn drain(&self) {
        if let Some(head) = self.head() {
            head.drain().await;
        }
    }
}
