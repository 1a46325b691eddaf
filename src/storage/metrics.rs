//! Shared metrics recording for store backends.

use std::time::Instant;

/// Records count and latency of one store operation.
///
/// - `assetdb_store_operations_total`: counter by backend, operation and status
/// - `assetdb_store_operation_duration_ms`: latency histogram, same labels
pub fn record_operation_metrics<T>(
    backend: &'static str,
    operation: &'static str,
    start: Instant,
    result: &crate::Result<T>,
) {
    let status = match result {
        Ok(_) => "success",
        Err(crate::Error::Cancelled { .. }) => "cancelled",
        Err(_) => "error",
    };
    metrics::counter!(
        "assetdb_store_operations_total",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "assetdb_store_operation_duration_ms",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}
