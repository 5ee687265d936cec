//! Graph entry points.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::stage::Item;

use super::{Branch, Dangling, Downstream};

/// Lifecycle of a graph run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphState {
    /// No run in progress.
    Idle,
    /// The seed is being accepted.
    Running,
    /// Waiting for everything downstream to finish.
    Draining,
}

impl GraphState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Draining => 2,
        }
    }
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(GraphState::Idle.as_u8()))
    }

    fn get(&self) -> GraphState {
        GraphState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: GraphState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

/// Starts a run by handing a seed item to its successor, then drains the
/// whole downstream graph.
pub struct Root<T> {
    name: String,
    next: RwLock<Arc<dyn Downstream<T>>>,
    state: StateCell,
}

impl<T: Item> Default for Root<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> Root<T> {
    pub fn new() -> Self {
        Self::named("root")
    }

    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            next: RwLock::new(Arc::new(Dangling::new(name.clone()))),
            name,
            state: StateCell::new(),
        }
    }

    /// Sets the successor and returns it.
    pub fn next<D>(&self, next: D) -> D
    where
        D: Downstream<T> + Clone + 'static,
    {
        let successor: Arc<dyn Downstream<T>> = Arc::new(next.clone());
        match self.next.write() {
            Ok(mut guard) => *guard = successor,
            Err(poisoned) => *poisoned.into_inner() = successor,
        }
        next
    }

    pub fn state(&self) -> GraphState {
        self.state.get()
    }

    /// Runs the graph once with `seed` and returns when it is drained.
    pub async fn run(&self, seed: T) {
        let next = self.successor();
        info!("Graph {} run started", self.name);
        self.state.set(GraphState::Running);
        next.accept(seed).await;
        self.state.set(GraphState::Draining);
        debug!("Graph {} draining", self.name);
        next.drain().await;
        self.state.set(GraphState::Idle);
        info!("Graph {} run finished", self.name);
    }

    /// Drains the downstream graph without starting a run.
    pub async fn drain(&self) {
        self.successor().drain().await;
    }

    fn successor(&self) -> Arc<dyn Downstream<T>> {
        match self.next.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }
}

/// A root that triggers several independent subgraphs from one seed.
pub struct ForestRoot<T> {
    name: String,
    branch: Branch<T>,
    state: StateCell,
}

impl<T: Item> Default for ForestRoot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> ForestRoot<T> {
    pub fn new() -> Self {
        Self::named("forest")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            branch: Branch::new(),
            state: StateCell::new(),
        }
    }

    /// Adds a subgraph.
    pub fn next<D>(&self, next: D) -> &Self
    where
        D: Downstream<T> + 'static,
    {
        self.branch.next(next);
        self
    }

    pub fn len(&self) -> usize {
        self.branch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branch.is_empty()
    }

    pub fn state(&self) -> GraphState {
        self.state.get()
    }

    /// Seeds every subgraph and returns once all of them are drained.
    pub async fn run(&self, seed: T) {
        info!("Graph {} run started with {} subgraphs", self.name, self.branch.len());
        self.state.set(GraphState::Running);
        self.branch.accept(seed).await;
        self.state.set(GraphState::Draining);
        self.branch.drain().await;
        self.state.set(GraphState::Idle);
        info!("Graph {} run finished", self.name);
    }

    pub async fn drain(&self) {
        self.branch.drain().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;
    use crate::testing::{RecordingSink, VecSource};
    use std::time::Duration;

    #[tokio::test]
    async fn test_root_run_drains_graph() {
        let sink = Arc::new(RecordingSink::new("slow").with_delay(Duration::from_millis(5)));
        let root = Root::new();
        root.next(Node::source(VecSource::new("feed", vec![1u32, 2, 3, 4]), 1))
            .next(Node::sink(Arc::clone(&sink), 2));

        assert_eq!(root.state(), GraphState::Idle);
        root.run(0).await;
        assert_eq!(root.state(), GraphState::Idle);

        let mut items = sink.items().await;
        items.sort();
        assert_eq!(items, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_root_without_successor_is_benign() {
        let root: Root<u32> = Root::named("empty");
        root.run(1).await;
        root.drain().await;
        assert_eq!(root.state(), GraphState::Idle);
    }

    #[tokio::test]
    async fn test_root_can_run_repeatedly() {
        let sink = Arc::new(RecordingSink::new("collect"));
        let root = Root::new();
        root.next(Node::source(VecSource::new("feed", vec![1u32, 2]), 1))
            .next(Node::sink(Arc::clone(&sink), 1));

        root.run(0).await;
        root.run(0).await;

        assert_eq!(sink.items().await, vec![1, 2, 1, 2]);
    }

    #[tokio::test]
    async fn test_forest_root_runs_every_subgraph() {
        let a = Arc::new(RecordingSink::new("a"));
        let b = Arc::new(RecordingSink::new("b"));

        let feed_a = Node::source(VecSource::new("feed-a", vec![1u32, 2]), 1);
        feed_a.next(Node::sink(Arc::clone(&a), 1));
        let feed_b = Node::source(VecSource::new("feed-b", vec![10u32, 20, 30]), 1);
        feed_b.next(Node::sink(Arc::clone(&b), 1));

        let forest = ForestRoot::new();
        forest.next(feed_a).next(feed_b);
        assert_eq!(forest.len(), 2);

        forest.run(0).await;

        assert_eq!(a.items().await, vec![1, 2]);
        assert_eq!(b.items().await, vec![10, 20, 30]);
        assert_eq!(forest.state(), GraphState::Idle);
    }

    #[test]
    fn test_graph_state_serialization() {
        let json = serde_json::to_string(&GraphState::Draining).unwrap();
        assert_eq!(json, "\"draining\"");
    }
}
