//! Flat source-to-sink orchestration.
//!
//! A [`Pair`] connects any number of sources to any number of sinks. Each
//! cycle has three phases:
//! - every [`FeedController`] pulls its source and copies each item into
//!   every sink queue
//! - once all sources are exhausted, every queue receives one end-of-stream
//! - every [`DownloadController`] drains its queue, and the cycle ends when
//!   all queues are fully processed
//!
//! Feeding and downloading overlap within a cycle, but a new cycle never
//! starts while downloads from the previous one are outstanding.

mod download;
mod feed;
mod runner;
mod types;

pub use download::DownloadController;
pub use feed::FeedController;
pub use runner::Pair;
pub use types::{CycleReport, FeedReport, PairError, SinkReport};
