pub mod config;
pub mod controller;
pub mod decorate;
pub mod graph;
pub mod limiter;
pub mod metrics;
pub mod pair;
pub mod queue;
pub mod stage;
pub mod testing;
pub mod update;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, PairConfig,
};
pub use controller::{Controller, Schedule};
pub use decorate::{AmplifiedSource, FilteredSource, WithCallback, WithFilter};
pub use graph::{Branch, Chain, Dangling, Downstream, ForestRoot, GraphState, Node, Root};
pub use limiter::LimiterRegistry;
pub use pair::{CycleReport, FeedReport, Pair, PairError, SinkReport};
pub use stage::{
    Amplifier, BoxError, FnTransform, Item, Reactor, Sink, Source, StageError, Status, Transform,
};
pub use update::{
    update_sink, MemoryUpdateStore, UpdateError, UpdateFilter, UpdateReactor, UpdateSink,
    UpdateStore,
};
