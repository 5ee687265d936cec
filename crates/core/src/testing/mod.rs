//! Testing utilities and mock stages for pipeline tests.
//!
//! This module provides mock implementations of every stage trait, so that
//! pairs, graphs and controllers can be exercised without real feeds or
//! downloaders.
//!
//! # Example
//!
//! ```rust,ignore
//! use simplarchiver_core::testing::{RecordingSink, VecSource};
//!
//! let sink = Arc::new(RecordingSink::new("collect"));
//! let mut pair = Pair::new("test");
//! pair.add_source(VecSource::new("numbers", vec![1, 2, 3]));
//! pair.add_sink(Arc::clone(&sink));
//!
//! pair.run_once().await?;
//! assert_eq!(sink.items().await, vec![1, 2, 3]);
//! ```

mod mock_reactor;
mod mock_sink;
mod mock_source;

pub use mock_reactor::RecordingReactor;
pub use mock_sink::{
    ConcurrencyProbe, FailingSink, PanickingSink, PanickingTransform, PeakGauge,
    RecordingSink,
};
pub use mock_source::{FailingSource, PanickingSource, VecSource};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::config::PairConfig;

    /// Items named `"{prefix}-0"`, `"{prefix}-1"`, and so on.
    pub fn labelled_items(prefix: &str, count: usize) -> Vec<String> {
        (0..count).map(|i| format!("{}-{}", prefix, i)).collect()
    }

    /// A pair config with small limits and no initial delay.
    pub fn pair_config(name: &str) -> PairConfig {
        PairConfig {
            name: name.to_string(),
            initial_delay_secs: 0,
            interval_secs: 5,
            feed_concurrency: 2,
            download_concurrency: 2,
            queue_capacity: 10,
        }
    }
}
