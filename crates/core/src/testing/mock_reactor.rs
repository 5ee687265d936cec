//! Mock reactors for testing.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::stage::{Item, Reactor, StageError, Status};

/// Records every `(item, status)` pair it sees.
///
/// Optionally rewrites the status it passes on, which lets tests check that
/// a reactor's return value is what the pipeline reports.
#[derive(Debug)]
pub struct RecordingReactor<T> {
    seen: RwLock<Vec<(T, Status)>>,
    rewrite: Option<Status>,
}

impl<T: Item> Default for RecordingReactor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> RecordingReactor<T> {
    pub fn new() -> Self {
        Self {
            seen: RwLock::new(Vec::new()),
            rewrite: None,
        }
    }

    /// Always pass on `status` instead of the one received.
    pub fn rewriting_to(status: Status) -> Self {
        Self {
            seen: RwLock::new(Vec::new()),
            rewrite: Some(status),
        }
    }

    pub async fn seen(&self) -> Vec<(T, Status)> {
        self.seen.read().await.clone()
    }

    pub async fn statuses(&self) -> Vec<Status> {
        self.seen.read().await.iter().map(|(_, s)| s.clone()).collect()
    }
}

#[async_trait]
impl<T: Item> Reactor<T> for RecordingReactor<T> {
    fn name(&self) -> &str {
        "recording-reactor"
    }

    async fn react(&self, item: &T, status: Status) -> Result<Status, StageError> {
        self.seen.write().await.push((item.clone(), status.clone()));
        Ok(self.rewrite.clone().unwrap_or(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_reactor_passes_status_through() {
        let reactor = RecordingReactor::new();
        let out = reactor.react(&"a".to_string(), Status::Code(2)).await.unwrap();
        assert_eq!(out, Status::Code(2));
        assert_eq!(reactor.seen().await, vec![("a".to_string(), Status::Code(2))]);
    }

    #[tokio::test]
    async fn test_recording_reactor_rewrites() {
        let reactor = RecordingReactor::rewriting_to(Status::Skipped);
        let out = reactor.react(&1u8, Status::Success).await.unwrap();
        assert_eq!(out, Status::Skipped);
        assert_eq!(reactor.statuses().await, vec![Status::Success]);
    }
}
