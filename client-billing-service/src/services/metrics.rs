//! Prometheus metrics for client-billing-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Invoice status transitions by source and target status.
pub static INVOICE_TRANSITIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_invoice_transitions_total",
        "Total number of invoice status transitions",
        &["from", "to"]
    )
    .expect("Failed to register invoice_transitions_total")
});

/// Ledger operations by kind.
pub static LEDGER_OPERATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_ledger_operations_total",
        "Total number of unpaid-amount ledger operations",
        &["operation"] // add, edit, invoice
    )
    .expect("Failed to register ledger_operations_total")
});

/// Reminder attempts by checkpoint and outcome.
pub static REMINDER_ATTEMPTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_reminder_attempts_total",
        "Total number of reminder attempts",
        &["reminder_type", "status"]
    )
    .expect("Failed to register reminder_attempts_total")
});

/// Webhook deliveries by event type and recorded HTTP status.
pub static WEBHOOK_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_webhook_events_total",
        "Total number of payment gateway webhook deliveries",
        &["event_type", "status"]
    )
    .expect("Failed to register webhook_events_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Storage operation duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "billing_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&INVOICE_TRANSITIONS_TOTAL);
    Lazy::force(&LEDGER_OPERATIONS_TOTAL);
    Lazy::force(&REMINDER_ATTEMPTS_TOTAL);
    Lazy::force(&WEBHOOK_EVENTS_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

/// Count an error by its stable kind label.
pub fn record_error(error: &service_core::error::AppError) {
    ERRORS_TOTAL.with_label_values(&[error.kind()]).inc();
}
