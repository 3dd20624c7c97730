//! Central metrics registry and metric definitions
//!
//! Metrics are registered in the default Prometheus registry lazily on first
//! access using once_cell::Lazy.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

// ===== API Request Metrics =====

/// Total number of API requests by method, endpoint, and status code
pub static API_REQUEST_COUNT: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "geogate_api_requests_total",
        "Total number of API requests",
        &["method", "endpoint", "status"]
    )
    .expect("Failed to register API request counter")
});

/// API request duration histogram
pub static API_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "geogate_api_request_duration_seconds",
        "API request duration in seconds",
        &["method", "endpoint"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to register API request duration histogram")
});

/// Requests currently in flight
pub static ACTIVE_REQUESTS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "geogate_active_requests",
        "Number of requests currently being served"
    )
    .expect("Failed to register active requests gauge")
});

// ===== Authorization Metrics =====

/// Access decisions by endpoint class and outcome code
pub static AUTHZ_DECISIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "geogate_authz_decisions_total",
        "Access decisions by endpoint class and outcome",
        &["class", "outcome"]
    )
    .expect("Failed to register authz decisions counter")
});

/// Quota rejections by limit kind and error code
pub static QUOTA_REJECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "geogate_quota_rejections_total",
        "Requests refused by the quota stage",
        &["limit", "code"]
    )
    .expect("Failed to register quota rejections counter")
});

// ===== Metering Metrics =====

/// Qualifying responses added to a bucket
pub static METERING_BUCKETS_RECORDED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "geogate_metering_records_total",
        "Responses recorded into metering buckets"
    )
    .expect("Failed to register metering records counter")
});

/// Aggregated events published to the sink
pub static METERING_EVENTS_FLUSHED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "geogate_metering_events_flushed_total",
        "Metering events published to the event sink"
    )
    .expect("Failed to register metering flushed counter")
});

/// Aggregated events dropped after a publish failure
pub static METERING_EVENTS_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "geogate_metering_events_dropped_total",
        "Metering events dropped after a publish failure"
    )
    .expect("Failed to register metering dropped counter")
});
