//! Graph composition over bounded-concurrency nodes.
//!
//! A graph is built from [`Node`]s wired together with `next`:
//! - [`Chain`]: nodes in a line, each feeding the next
//! - [`Branch`]: one input copied to several successors
//! - [`Root`] / [`ForestRoot`]: entry points that start a run and drain it
//!
//! Driving a graph is always `accept(item)` followed by `drain()`. Stage
//! failures degrade to "no output" and never surface to the caller.
//!
//! # Example
//!
//! ```ignore
//! use simplarchiver_core::graph::{Branch, Node, Root};
//!
//! let root = Root::new();
//! let fork = root
//!     .next(Node::source(feed, 1))
//!     .next(Node::transform(filter, 2))
//!     .next(Branch::new());
//! fork.next(Node::sink(downloader_a, 2));
//! fork.next(Node::sink(downloader_b, 2));
//!
//! root.run(seed).await;
//! ```
//!
//! Graphs must be acyclic; `drain` follows successors recursively.

mod compose;
mod node;
mod root;

use async_trait::async_trait;
use tracing::warn;

use crate::stage::Item;

pub use compose::{Branch, Chain};
pub use node::Node;
pub use root::{ForestRoot, GraphState, Root};

/// Anything that can receive items and report when it has finished them.
#[async_trait]
pub trait Downstream<T>: Send + Sync {
    /// Hands over one item, suspending while the receiver is full.
    async fn accept(&self, item: T);

    /// Resolves once everything accepted so far has been fully processed,
    /// including by everything further downstream.
    async fn drain(&self);
}

/// Successor of a node that has none: logs each item and drops it.
#[derive(Debug, Clone)]
pub struct Dangling {
    owner: String,
}

impl Dangling {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
        }
    }
}

#[async_trait]
impl<T: Item> Downstream<T> for Dangling {
    async fn accept(&self, item: T) {
        warn!("There is no next node after {} for item {:?}", self.owner, item);
    }

    async fn drain(&self) {}
}
