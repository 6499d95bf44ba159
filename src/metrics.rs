use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all pacebeat metrics
const PREFIX: &str = "pacebeat";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Recommendation fetches
    pub static ref RECOMMENDATION_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_recommendation_requests_total"),
            "Settled recommendation requests by outcome"
        ),
        &["outcome"]
    ).expect("Failed to create recommendation_requests_total metric");

    pub static ref RECOMMENDATION_FETCH_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_recommendation_fetch_duration_seconds"),
            "Recommendation request duration in seconds"
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0])
    ).expect("Failed to create recommendation_fetch_duration_seconds metric");

    pub static ref GATE_DENIED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_gate_denied_total"),
        "Refill attempts skipped because a fetch was already in flight"
    ).expect("Failed to create gate_denied_total metric");

    pub static ref FETCH_IN_FLIGHT: Gauge = Gauge::new(
        format!("{PREFIX}_fetch_in_flight"),
        "1 while a recommendation fetch is outstanding"
    ).expect("Failed to create fetch_in_flight metric");

    // Internal queue
    pub static ref TRACKS_ENQUEUED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_tracks_enqueued_total"),
        "Tracks handed to the playback engine"
    ).expect("Failed to create tracks_enqueued_total metric");

    pub static ref TRACKS_RETIRED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_tracks_retired_total"),
        "Tracks removed from the internal queue after playing"
    ).expect("Failed to create tracks_retired_total metric");

    pub static ref INTERNAL_QUEUE_LENGTH: Gauge = Gauge::new(
        format!("{PREFIX}_internal_queue_length"),
        "Tracks currently tracked in the internal queue"
    ).expect("Failed to create internal_queue_length metric");

    // Background execution
    pub static ref BACKGROUND_WINDOW_EXITS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_background_window_exits_total"),
            "Background windows ended, by reason"
        ),
        &["reason"]
    ).expect("Failed to create background_window_exits_total metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(RECOMMENDATION_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RECOMMENDATION_FETCH_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(GATE_DENIED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(FETCH_IN_FLIGHT.clone()));
    let _ = REGISTRY.register(Box::new(TRACKS_ENQUEUED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TRACKS_RETIRED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(INTERNAL_QUEUE_LENGTH.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_WINDOW_EXITS_TOTAL.clone()));

    tracing::debug!("Metrics registered");
}

/// Record a settled recommendation request
pub fn record_recommendation(outcome: &str, duration: Duration) {
    RECOMMENDATION_REQUESTS_TOTAL
        .with_label_values(&[outcome])
        .inc();
    RECOMMENDATION_FETCH_DURATION_SECONDS.observe(duration.as_secs_f64());
}

pub fn record_gate_denied() {
    GATE_DENIED_TOTAL.inc();
}

pub fn set_fetch_in_flight(in_flight: bool) {
    FETCH_IN_FLIGHT.set(if in_flight { 1.0 } else { 0.0 });
}

pub fn record_track_enqueued() {
    TRACKS_ENQUEUED_TOTAL.inc();
}

pub fn record_tracks_retired(count: usize) {
    TRACKS_RETIRED_TOTAL.inc_by(count as f64);
}

pub fn set_queue_length(len: usize) {
    INTERNAL_QUEUE_LENGTH.set(len as f64);
}

pub fn record_window_exit(reason: &str) {
    BACKGROUND_WINDOW_EXITS_TOTAL
        .with_label_values(&[reason])
        .inc();
}

/// Render all registered metrics in the Prometheus text format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
