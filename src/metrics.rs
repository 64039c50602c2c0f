//! Prometheus collector taxonomy for the pipeline's worker fleet.
//!
//! Counters/gauges/histograms are registered once into a process-wide
//! `Registry` behind `once_cell::sync::Lazy`, the way the teacher's
//! `v2::metrics` module registers its `siem_v2_*` series. Label cardinality
//! is bounded by the topic catalog (`topics::all()`), never by raw message
//! content.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static MESSAGES_CONSUMED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("messages_consumed_total", "Messages fetched from the broker"),
        &["topic"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static MESSAGES_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("messages_processed_total", "Messages handled successfully"),
        &["topic"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static MESSAGES_FAILED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("messages_failed_total", "Handler attempt failures"),
        &["topic"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static MESSAGES_RETRIED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("messages_retried_total", "Retry attempts scheduled"),
        &["topic"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static MESSAGES_DEAD_LETTERED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("messages_dead_lettered_total", "Messages quarantined to a DLQ"),
        &["topic"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static TASK_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let h = HistogramVec::new(
        HistogramOpts::new("task_duration_seconds", "Handler invocation latency"),
        &["topic"],
    )
    .unwrap();
    REGISTRY.register(Box::new(h.clone())).ok();
    h
});

static ACTIVE_TASKS: Lazy<IntGaugeVec> = Lazy::new(|| {
    let g = IntGaugeVec::new(
        Opts::new("active_tasks", "In-flight handler invocations"),
        &["topic"],
    )
    .unwrap();
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

static ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("errors_total", "Errors by component, kind, and severity"),
        &["component", "error_type", "severity"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static MQ_DEPTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    let g = IntGaugeVec::new(Opts::new("mq_depth", "Consumer lag per topic"), &["queue"]).unwrap();
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

pub fn inc_messages_consumed(topic: &str) {
    MESSAGES_CONSUMED.with_label_values(&[topic]).inc();
}

pub fn inc_messages_processed(topic: &str) {
    MESSAGES_PROCESSED.with_label_values(&[topic]).inc();
}

pub fn inc_messages_failed(topic: &str) {
    MESSAGES_FAILED.with_label_values(&[topic]).inc();
}

pub fn inc_messages_retried(topic: &str) {
    MESSAGES_RETRIED.with_label_values(&[topic]).inc();
}

pub fn inc_messages_dead_lettered(topic: &str) {
    MESSAGES_DEAD_LETTERED.with_label_values(&[topic]).inc();
}

pub fn observe_task_duration(topic: &str, seconds: f64) {
    TASK_DURATION_SECONDS
        .with_label_values(&[topic])
        .observe(seconds);
}

pub fn active_tasks_inc(topic: &str) {
    ACTIVE_TASKS.with_label_values(&[topic]).inc();
}

pub fn active_tasks_dec(topic: &str) {
    ACTIVE_TASKS.with_label_values(&[topic]).dec();
}

pub fn inc_error(component: &str, error_type: &str, severity: &str) {
    ERRORS_TOTAL
        .with_label_values(&[component, error_type, severity])
        .inc();
}

pub fn set_mq_depth(queue: &str, depth: i64) {
    MQ_DEPTH.with_label_values(&[queue]).set(depth);
}

/// Renders the registry in Prometheus text exposition format for the
/// worker's `GET /metrics` endpoint.
pub fn render() -> String {
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    TextEncoder::new().encode(&families, &mut buf).ok();
    String::from_utf8(buf).unwrap_or_default()
}
