//! Prometheus metrics for import-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec, Encoder,
    HistogramVec, TextEncoder,
};

/// Counter for import requests by outcome.
pub static IMPORT_REQUESTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "import_requests_total",
        "Total number of statement import requests",
        &["status"]
    )
    .expect("Failed to register IMPORT_REQUESTS")
});

/// Counter for imported rows by what happened to them.
pub static IMPORT_ROWS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "import_rows_total",
        "Total number of imported statement rows",
        &["outcome"]
    )
    .expect("Failed to register IMPORT_ROWS")
});

/// Histogram for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "import_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "import_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Counter for statement recalculations that failed after a committed import.
pub static STATEMENT_RECALC_FAILURES: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "import_statement_recalc_failures_total",
        "Statement total recalculations that failed after commit"
    )
    .expect("Failed to register STATEMENT_RECALC_FAILURES")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&IMPORT_REQUESTS);
    Lazy::force(&IMPORT_ROWS);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&ERRORS);
    Lazy::force(&STATEMENT_RECALC_FAILURES);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record an import request.
pub fn record_import_request(status: &str) {
    IMPORT_REQUESTS.with_label_values(&[status]).inc();
}

/// Record `count` rows with the given outcome.
pub fn record_rows(outcome: &str, count: usize) {
    if count > 0 {
        IMPORT_ROWS.with_label_values(&[outcome]).inc_by(count as f64);
    }
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}

pub fn record_statement_recalc_failure() {
    STATEMENT_RECALC_FAILURES.inc();
}
