use std::net::SocketAddr;

use crate::engine::ScheduleViolation;

// ── Request-driven ──────────────────────────────────────────────

/// Counter: engine operations. Labels: op, status (ok | rejected | error).
pub const OPERATIONS_TOTAL: &str = "timetable_operations_total";

/// Histogram: engine operation latency in seconds, locks included. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "timetable_operation_duration_seconds";

/// Counter: rejected schedules. Labels: kind.
pub const VIOLATIONS_TOTAL: &str = "timetable_violations_total";

// ── State ───────────────────────────────────────────────────────

/// Gauge: scheduled lectures in the store.
pub const LECTURES_ACTIVE: &str = "timetable_lectures_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "timetable_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "timetable_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "timetable_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

pub fn record_violation(violation: &ScheduleViolation) {
    metrics::counter!(VIOLATIONS_TOTAL, "kind" => violation.label()).increment(1);
}
