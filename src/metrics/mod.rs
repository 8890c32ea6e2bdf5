//! Prometheus metrics for the delivery subsystem.
//!
//! Covers the enqueue path (enqueued/deduplicated/skipped), the delivery
//! path (sent, failed by classification, retries scheduled) and the
//! preference caches.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "courier";

lazy_static! {
    // ============================================================================
    // Enqueue Metrics
    // ============================================================================

    /// Notifications accepted and persisted as PENDING
    pub static ref NOTIFICATIONS_ENQUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_notifications_enqueued_total", METRIC_PREFIX),
        "Notifications accepted and persisted as PENDING"
    ).unwrap();

    /// Enqueue requests resolved to an existing row by idempotency key
    pub static ref NOTIFICATIONS_DEDUPLICATED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_notifications_deduplicated_total", METRIC_PREFIX),
        "Enqueue requests deduplicated by idempotency key"
    ).unwrap();

    /// Notifications skipped by preference resolution
    pub static ref NOTIFICATIONS_SKIPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_notifications_skipped_total", METRIC_PREFIX),
        "Notifications skipped by preference resolution"
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    /// Successful deliveries
    pub static ref DELIVERIES_SENT_TOTAL: IntCounter = register_int_counter!(
        format!("{}_deliveries_sent_total", METRIC_PREFIX),
        "Successful deliveries"
    ).unwrap();

    /// Failed delivery attempts by classification
    pub static ref DELIVERIES_FAILED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_deliveries_failed_total", METRIC_PREFIX),
        "Failed delivery attempts",
        &["mode"]
    ).unwrap();

    /// Retries scheduled after transient failures
    pub static ref DELIVERY_RETRIES_SCHEDULED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_delivery_retries_scheduled_total", METRIC_PREFIX),
        "Retries scheduled after transient failures"
    ).unwrap();

    /// Time spent executing one delivery attempt
    pub static ref DELIVERY_ATTEMPT_DURATION: Histogram = register_histogram!(
        format!("{}_delivery_attempt_duration_seconds", METRIC_PREFIX),
        "Time spent executing one delivery attempt",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    // ============================================================================
    // Preference Cache Metrics
    // ============================================================================

    /// Cache hits by cache name (policy / role_default)
    pub static ref PREFERENCE_CACHE_HITS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_preference_cache_hits_total", METRIC_PREFIX),
        "Preference cache hits",
        &["cache"]
    ).unwrap();

    /// Cache misses by cache name (policy / role_default)
    pub static ref PREFERENCE_CACHE_MISSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_preference_cache_misses_total", METRIC_PREFIX),
        "Preference cache misses",
        &["cache"]
    ).unwrap();
}

/// Delivery failure classification labels
pub struct DeliveryMetrics;

impl DeliveryMetrics {
    pub fn record_sent() {
        DELIVERIES_SENT_TOTAL.inc();
    }

    pub fn record_permanent_failure() {
        DELIVERIES_FAILED_TOTAL.with_label_values(&["permanent"]).inc();
    }

    pub fn record_transient_failure() {
        DELIVERIES_FAILED_TOTAL.with_label_values(&["transient"]).inc();
        DELIVERY_RETRIES_SCHEDULED_TOTAL.inc();
    }
}

/// Encode all registered metrics in Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
