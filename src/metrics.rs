// Prometheus metrics definitions for the ladder service.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Counters ─────────────────────────────────────────────────────

    /// Total players registered, by ladder variant.
    pub static ref PLAYERS_REGISTERED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("ladder_players_registered_total", "Total players registered"),
        &["variant"],
    )
    .unwrap();

    /// Total match reports submitted, by ladder variant.
    pub static ref MATCHES_REPORTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("ladder_matches_reported_total", "Total match reports submitted"),
        &["variant"],
    )
    .unwrap();

    /// Total matches approved to completion, by ladder variant.
    pub static ref MATCHES_APPROVED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("ladder_matches_approved_total", "Total matches approved"),
        &["variant"],
    )
    .unwrap();

    /// Total matches rejected, by ladder variant.
    pub static ref MATCHES_REJECTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("ladder_matches_rejected_total", "Total matches rejected"),
        &["variant"],
    )
    .unwrap();

    /// Approvals that stopped partway and need a resume, by ladder variant.
    pub static ref PARTIAL_APPROVALS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("ladder_partial_approvals_total", "Approvals left incomplete"),
        &["variant"],
    )
    .unwrap();

    /// Rating batch retries after a version conflict, by ladder variant.
    pub static ref APPROVAL_CONFLICT_RETRIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "ladder_approval_conflict_retries_total",
            "Rating batch retries after version conflicts",
        ),
        &["variant"],
    )
    .unwrap();

    /// Ladder position gains recorded, by ladder variant.
    pub static ref PROMOTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("ladder_promotions_total", "Ladder position gains recorded"),
        &["variant"],
    )
    .unwrap();

    /// Ladder position losses recorded, by ladder variant.
    pub static ref DEMOTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("ladder_demotions_total", "Ladder position losses recorded"),
        &["variant"],
    )
    .unwrap();

    /// Ribbons awarded or upgraded, by ladder variant and ribbon name.
    pub static ref RIBBONS_AWARDED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("ladder_ribbons_awarded_total", "Ribbons awarded or upgraded"),
        &["variant", "ribbon"],
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// End-to-end approval duration in seconds, by ladder variant.
    pub static ref APPROVAL_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "ladder_approval_duration_seconds",
            "End-to-end approval duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        &["variant"],
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(PLAYERS_REGISTERED_TOTAL.clone()),
        Box::new(MATCHES_REPORTED_TOTAL.clone()),
        Box::new(MATCHES_APPROVED_TOTAL.clone()),
        Box::new(MATCHES_REJECTED_TOTAL.clone()),
        Box::new(PARTIAL_APPROVALS_TOTAL.clone()),
        Box::new(APPROVAL_CONFLICT_RETRIES_TOTAL.clone()),
        Box::new(PROMOTIONS_TOTAL.clone()),
        Box::new(DEMOTIONS_TOTAL.clone()),
        Box::new(RIBBONS_AWARDED_TOTAL.clone()),
        Box::new(APPROVAL_DURATION_SECONDS.clone()),
    ];

    for c in collectors {
        REGISTRY.register(c).expect("failed to register metric");
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_metrics_returns_string() {
        // Register and gather -- should not panic
        register_metrics();
        PLAYERS_REGISTERED_TOTAL.with_label_values(&["1v1"]).inc();
        let output = gather_metrics();
        assert!(output.contains("ladder_"));
    }

    #[test]
    fn test_metric_increments() {
        // Just verify that incrementing metrics works without panicking
        MATCHES_REPORTED_TOTAL.with_label_values(&["1v1"]).inc();
        MATCHES_APPROVED_TOTAL.with_label_values(&["ffa"]).inc();
        MATCHES_REJECTED_TOTAL.with_label_values(&["1v1"]).inc();
        PARTIAL_APPROVALS_TOTAL.with_label_values(&["1v1"]).inc();
        APPROVAL_CONFLICT_RETRIES_TOTAL
            .with_label_values(&["1v1"])
            .inc();
        PROMOTIONS_TOTAL.with_label_values(&["1v1"]).inc();
        DEMOTIONS_TOTAL.with_label_values(&["1v1"]).inc();
        RIBBONS_AWARDED_TOTAL
            .with_label_values(&["1v1", "veteran"])
            .inc();
        APPROVAL_DURATION_SECONDS
            .with_label_values(&["1v1"])
            .observe(0.05);
    }
}
