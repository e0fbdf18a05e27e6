use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all pipeline metrics
const PREFIX: &str = "catalog_pipeline";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Scheduler
    pub static ref TASK_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_task_runs_total"), "Task executions by outcome"),
        &["task", "outcome"]
    ).expect("Failed to create task_runs_total metric");

    pub static ref TASK_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_task_duration_seconds"),
            "Task execution duration in seconds"
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 1800.0]),
        &["task"]
    ).expect("Failed to create task_duration_seconds metric");

    pub static ref ROUNDS_TOTAL: IntCounter = IntCounter::new(
        format!("{PREFIX}_rounds_total"),
        "Completed passes over the task list"
    ).expect("Failed to create rounds_total metric");

    // Ledger
    pub static ref BACKOFF_RECORDS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_backoff_records_total"), "Backoff records written"),
        &["policy"]
    ).expect("Failed to create backoff_records_total metric");

    // Unifier / matcher
    pub static ref ENTITIES_CREATED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_entities_created_total"), "Canonical entities created"),
        &["kind"]
    ).expect("Failed to create entities_created_total metric");
}

/// Registers every metric with [`REGISTRY`]. Safe to call more than once.
pub fn init_metrics() {
    let _ = REGISTRY.register(Box::new(TASK_RUNS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TASK_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(ROUNDS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKOFF_RECORDS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ENTITIES_CREATED_TOTAL.clone()));

    tracing::debug!("Metrics registered");
}

pub fn record_task_run(task: &str, outcome: &str, duration: Duration) {
    TASK_RUNS_TOTAL.with_label_values(&[task, outcome]).inc();
    TASK_DURATION_SECONDS
        .with_label_values(&[task])
        .observe(duration.as_secs_f64());
}

pub fn record_round() {
    ROUNDS_TOTAL.inc();
}

pub fn record_backoff(policy: &str) {
    BACKOFF_RECORDS_TOTAL.with_label_values(&[policy]).inc();
}

pub fn record_entity_created(kind: &str) {
    ENTITIES_CREATED_TOTAL.with_label_values(&[kind]).inc();
}

/// Prometheus text exposition of the registry, as printed by the console.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
