//! Metric names and recording helpers for Hydra.
//!
//! Recording goes through the `metrics` facade; nothing is exported unless
//! the binary installs a recorder.

use metrics::{counter, describe_counter, describe_histogram, histogram};

pub const SYNC_OUTCOMES_TOTAL: &str = "hydra_sync_outcomes_total";
pub const SYNC_DURATION_SECONDS: &str = "hydra_sync_duration_seconds";
pub const RECORDS_INGESTED_TOTAL: &str = "hydra_records_ingested_total";
pub const CANONICAL_ASSETS_TOTAL: &str = "hydra_canonical_assets_total";

/// Registers metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(
        SYNC_OUTCOMES_TOTAL,
        "Candidates processed per target, by outcome"
    );
    describe_histogram!(SYNC_DURATION_SECONDS, "Duration of one target run");
    describe_counter!(
        RECORDS_INGESTED_TOTAL,
        "Raw source records accepted for reconciliation"
    );
    describe_counter!(
        CANONICAL_ASSETS_TOTAL,
        "Canonical assets produced by merging"
    );
}

/// Counts one candidate outcome (`created`, `updated`, `skipped`, `failed`).
pub fn record_sync_outcome(target: &str, outcome: &'static str) {
    counter!(SYNC_OUTCOMES_TOTAL, "target" => target.to_string(), "outcome" => outcome)
        .increment(1);
}

pub fn record_sync_duration(target: &str, duration_secs: f64) {
    histogram!(SYNC_DURATION_SECONDS, "target" => target.to_string()).record(duration_secs);
}

/// Counts a prepared batch: raw records in, canonical assets out.
pub fn record_prepared_batch(records: usize, assets: usize) {
    counter!(RECORDS_INGESTED_TOTAL).increment(records as u64);
    counter!(CANONICAL_ASSETS_TOTAL).increment(assets as u64);
}
