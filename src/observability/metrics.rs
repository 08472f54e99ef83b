//! Prometheus metrics for the retention engine.
//!
//! Provides metrics for:
//! - HTTP request latency and counts
//! - Records exported and deleted per entity/table
//! - Audit write failures and error responses

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

/// Global Prometheus handle for the metrics endpoint.
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Histogram buckets for request and prune durations, in seconds.
#[cfg(feature = "prometheus")]
const DURATION_BUCKETS: &[f64] = &[0.005, 0.025, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0];

/// Initialize the metrics system with the given configuration.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            DURATION_BUCKETS,
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?;

    let handle = builder.install_recorder().map_err(MetricsError::Install)?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

/// Get the Prometheus handle for rendering metrics.
#[cfg(feature = "prometheus")]
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        let status_class = format!("{}xx", status / 100);

        counter!("http_requests_total", "method" => method.to_string(), "path" => path.to_string(), "status" => status.to_string(), "status_class" => status_class.clone())
            .increment(1);

        histogram!("http_request_duration_seconds", "method" => method.to_string(), "path" => path.to_string(), "status_class" => status_class)
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (method, path, status, duration_secs);
    }
}

/// Record records written into an export stream.
pub fn record_export_records(entity_type: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "retention_export_records_total",
            "entity_type" => entity_type.to_string()
        )
        .increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (entity_type, count);
    }
}

/// Record retention deletion.
///
/// # Arguments
/// * `table` - The table from which records were deleted (e.g., "financial_checkups")
/// * `count` - The number of records deleted
pub fn record_retention_deletion(table: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "retention_deletions_total",
            "table" => table.to_string()
        )
        .increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (table, count);
    }
}

/// Record the wall-clock duration of a prune run.
pub fn record_prune_duration(entity_type: &str, outcome: &str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        histogram!(
            "retention_prune_duration_seconds",
            "entity_type" => entity_type.to_string(),
            "outcome" => outcome.to_string()
        )
        .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (entity_type, outcome, duration_secs);
    }
}

/// Record an audit entry that could not be written after all retries.
pub fn record_audit_failure(entity_type: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "retention_audit_failures_total",
            "entity_type" => entity_type.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = entity_type;
    }
}

/// Record an error response.
///
/// Error types:
/// - `validation_error`, `safety_violation`: rejected input (400)
/// - `security_error`: token or credential failure (401/403)
/// - `not_found`: nothing to export or prune
/// - `partial_failure`, `internal_error`: server-side failures
pub fn record_error(error_type: &str, error_code: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "retention_errors_total",
            "error_type" => error_type.to_string(),
            "error_code" => error_code.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (error_type, error_code);
    }
}

/// Metrics errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
