//! Prometheus metrics for the pipeline engine.
//!
//! This module provides metrics for:
//! - Pair cycles (outcome, duration)
//! - Feed side (items produced)
//! - Download side (sink outcomes)
//! - Contained stage failures across pairs and graphs
//!
//! All counters are diagnostic only; nothing in the engine reads them back.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

/// Registry holding every engine metric.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    for metric in all_metrics() {
        if let Err(e) = registry.register(metric) {
            tracing::warn!("Failed to register metric: {}", e);
        }
    }
    registry
});

// =============================================================================
// Cycle Metrics
// =============================================================================

/// Completed cycles by pair and result.
pub static CYCLES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("simplarchiver_cycles_total", "Total pair cycles run"),
        &["pair", "result"], // "ok", "failed"
    )
    .unwrap()
});

/// Cycle duration in seconds.
pub static CYCLE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "simplarchiver_cycle_duration_seconds",
            "Duration of one feed-then-drain cycle",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0]),
        &["pair"],
    )
    .unwrap()
});

// =============================================================================
// Feed / Download Metrics
// =============================================================================

/// Items produced by sources and fanned out to sinks.
pub static ITEMS_FED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("simplarchiver_items_fed_total", "Total items produced by sources"),
        &["pair"],
    )
    .unwrap()
});

/// Sink outcomes by pair and status label.
pub static SINK_RESULTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("simplarchiver_sink_results_total", "Total sink invocations by outcome"),
        &["pair", "result"], // status label, or "error"
    )
    .unwrap()
});

/// Sink invocations currently running, per pair.
pub static DOWNLOADS_IN_FLIGHT: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "simplarchiver_downloads_in_flight",
            "Sink invocations currently holding a download permit",
        ),
        &["pair"],
    )
    .unwrap()
});

// =============================================================================
// Stage Metrics
// =============================================================================

/// Contained stage failures (errors and panics) by stage kind.
pub static STAGE_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "simplarchiver_stage_failures_total",
            "Total stage invocations that failed and were contained",
        ),
        &["stage_kind"], // "source", "transform", "amplifier", "sink", "reactor"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all engine metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(CYCLES_TOTAL.clone()),
        Box::new(CYCLE_DURATION.clone()),
        Box::new(ITEMS_FED.clone()),
        Box::new(SINK_RESULTS.clone()),
        Box::new(DOWNLOADS_IN_FLIGHT.clone()),
        Box::new(STAGE_FAILURES.clone()),
    ]
}

/// Records one contained stage failure.
pub(crate) fn record_stage_failure(stage_kind: &str) {
    STAGE_FAILURES.with_label_values(&[stage_kind]).inc();
}

/// Encode all registered metrics in the Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_metrics_register_cleanly() {
        let registry = Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }
    }

    #[test]
    fn test_encode_includes_recorded_metrics() {
        CYCLES_TOTAL.with_label_values(&["metrics-test", "ok"]).inc();
        record_stage_failure("transform");

        let text = encode_metrics();
        assert!(text.contains("simplarchiver_cycles_total"));
        assert!(text.contains("metrics-test"));
        assert!(text.contains("simplarchiver_stage_failures_total"));
    }
}
