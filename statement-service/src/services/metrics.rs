//! Prometheus metrics for statement-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

/// Histogram for database query duration by operation.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "statement_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Statements that finished processing, by final status.
pub static STATEMENTS_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "statements_processed_total",
        "Total number of statements processed",
        &["status"]
    )
    .expect("Failed to register STATEMENTS_PROCESSED")
});

pub static OCR_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "statement_ocr_duration_seconds",
        "OCR duration per statement in seconds",
        &["file_kind"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0]
    )
    .expect("Failed to register OCR_DURATION")
});

pub static TRANSACTIONS_EXTRACTED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "statement_transactions_extracted_total",
        "Total number of transactions extracted",
        &["flagged"]
    )
    .expect("Failed to register TRANSACTIONS_EXTRACTED")
});

/// Counter for errors by pipeline stage.
pub static ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "statement_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&STATEMENTS_PROCESSED);
    Lazy::force(&OCR_DURATION);
    Lazy::force(&TRANSACTIONS_EXTRACTED);
    Lazy::force(&ERRORS);
    Lazy::force(&service_core::middleware::metrics::HTTP_REQUESTS_TOTAL);
    Lazy::force(&service_core::middleware::metrics::HTTP_REQUEST_DURATION);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return format!("# Failed to encode metrics: {}\n", e);
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to UTF-8: {}", e);
        format!("# Failed to convert metrics to UTF-8: {}\n", e)
    })
}

pub fn record_statement_processed(status: &str) {
    STATEMENTS_PROCESSED.with_label_values(&[status]).inc();
}

pub fn record_transactions(total: usize, flagged: usize) {
    TRANSACTIONS_EXTRACTED
        .with_label_values(&["false"])
        .inc_by(total.saturating_sub(flagged) as u64);
    TRANSACTIONS_EXTRACTED
        .with_label_values(&["true"])
        .inc_by(flagged as u64);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_output_contains_registered_metrics() {
        init_metrics();
        record_statement_processed("completed");
        record_transactions(3, 1);

        let text = get_metrics();
        assert!(text.contains("statements_processed_total"));
        assert!(text.contains("statement_transactions_extracted_total"));
    }
}
