//! Runs many pairs side by side.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::pair::Pair;
use crate::stage::Item;

/// Something with a never-ending schedule.
///
/// Lets one [`Controller`] run pairs of different item types.
#[async_trait]
pub trait Schedule: Send + Sync {
    fn name(&self) -> &str;

    /// Runs until the task is aborted.
    async fn run_forever(&self);
}

#[async_trait]
impl<T: Item> Schedule for Pair<T> {
    fn name(&self) -> &str {
        Pair::name(self)
    }

    async fn run_forever(&self) {
        Pair::run_forever(self).await
    }
}

#[async_trait]
impl<S: Schedule + ?Sized> Schedule for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn run_forever(&self) {
        (**self).run_forever().await
    }
}

/// Runs every added pair concurrently, each in its own task.
///
/// Pairs share nothing, so a pair that fails or panics never affects the
/// others.
#[derive(Default)]
pub struct Controller {
    pairs: Vec<Arc<dyn Schedule>>,
}

impl Controller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pair(&mut self, pair: impl Schedule + 'static) -> &mut Self {
        self.pairs.push(Arc::new(pair));
        self
    }

    pub fn add_pairs<P>(&mut self, pairs: impl IntoIterator<Item = P>) -> &mut Self
    where
        P: Schedule + 'static,
    {
        for pair in pairs {
            self.add_pair(pair);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Names of the added pairs, in the order they were added.
    pub fn pair_names(&self) -> Vec<String> {
        self.pairs.iter().map(|p| p.name().to_string()).collect()
    }

    /// Starts every pair loop and waits for them.
    ///
    /// Pair loops do not end on their own, so in practice this never returns
    /// unless the controller is empty.
    pub async fn run(&self) {
        let mut tasks = self.spawn_all();
        Self::supervise(&mut tasks).await;
    }

    /// Like [`run`](Controller::run), but aborts every pair loop once
    /// `shutdown` resolves.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let mut tasks = self.spawn_all();
        let count = tasks.len();
        tokio::select! {
            _ = shutdown => {
                info!("Shutdown requested, stopping {} pair loops", count);
            }
            _ = Self::supervise(&mut tasks) => {}
        }
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        info!("Controller stopped");
    }

    fn spawn_all(&self) -> JoinSet<String> {
        let mut tasks = JoinSet::new();
        for pair in &self.pairs {
            let pair = Arc::clone(pair);
            info!("Starting pair {}", pair.name());
            tasks.spawn(async move {
                pair.run_forever().await;
                pair.name().to_string()
            });
        }
        tasks
    }

    async fn supervise(tasks: &mut JoinSet<String>) {
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(name) => warn!("Pair {} loop exited", name),
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!("Pair loop task failed: {}", e),
            }
        }
    }
}
