use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder, register_histogram,
    register_int_counter, register_int_counter_vec, register_int_gauge,
};

// --- Reconciliation Metrics ---

pub static PAYMENTS_STARTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "paytrack_payments_started_total",
        "Payment intents handed off to an external app"
    )
    .expect("payments_started counter")
});

pub static LEDGER_COMMITS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "paytrack_ledger_commits_total",
        "Ledger entries created, by verification source",
        &["verified_by"]
    )
    .expect("ledger_commits counter")
});

pub static DUPLICATE_COMMITS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "paytrack_duplicate_commits_total",
        "Ledger saves suppressed by idempotency key"
    )
    .expect("duplicate_commits counter")
});

pub static DEEP_LINK_RESOLUTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "paytrack_deep_link_resolutions_total",
        "Callback deep links processed, by outcome",
        &["outcome"]
    )
    .expect("deep_link_resolutions counter")
});

pub static PROMPTS_SHOWN: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "paytrack_prompts_shown_total",
        "Confirmation prompts raised after returning from a payment app"
    )
    .expect("prompts_shown counter")
});

pub static PROMPTS_SUPPRESSED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "paytrack_prompts_suppressed_total",
        "Foreground returns treated as focus flicker"
    )
    .expect("prompts_suppressed counter")
});

pub static PENDING_EVICTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "paytrack_pending_evicted_total",
        "Pending intents dropped by the size bound"
    )
    .expect("pending_evicted counter")
});

pub static STORAGE_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "paytrack_storage_errors_total",
        "Persistence failures degraded to safe defaults"
    )
    .expect("storage_errors counter")
});

pub static PENDING_INTENTS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "paytrack_pending_intents",
        "Visible pending intents after the last write"
    )
    .expect("pending_intents gauge")
});

pub static DWELL_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "paytrack_external_app_dwell_seconds",
        "Time spent in the external payment app",
        vec![1.0, 2.0, 5.0, 10.0, 12.0, 30.0, 60.0, 120.0, 300.0]
    )
    .expect("dwell_seconds histogram")
});

// --- Helpers ---

pub fn inc_payments_started() {
    PAYMENTS_STARTED.inc();
}

pub fn inc_ledger_commit(verified_by: &str) {
    LEDGER_COMMITS.with_label_values(&[verified_by]).inc();
}

pub fn inc_duplicate_commit() {
    DUPLICATE_COMMITS.inc();
}

pub fn inc_deep_link(outcome: &str) {
    DEEP_LINK_RESOLUTIONS.with_label_values(&[outcome]).inc();
}

pub fn inc_prompt_shown() {
    PROMPTS_SHOWN.inc();
}

pub fn inc_prompt_suppressed() {
    PROMPTS_SUPPRESSED.inc();
}

pub fn inc_pending_evicted(count: u64) {
    PENDING_EVICTED.inc_by(count);
}

pub fn inc_storage_error() {
    STORAGE_ERRORS.inc();
}

pub fn set_pending_intents(count: i64) {
    PENDING_INTENTS.set(count);
}

pub fn observe_dwell(secs: f64) {
    DWELL_SECONDS.observe(secs);
}

/// Render the default registry in the Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
