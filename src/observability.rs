use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "seatkeep_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "seatkeep_request_duration_seconds";

/// Counter: booking calls. Labels: outcome.
pub const BOOKINGS_TOTAL: &str = "seatkeep_bookings_total";

/// Histogram: end-to-end booking latency in seconds, retries included.
pub const BOOKING_DURATION_SECONDS: &str = "seatkeep_booking_duration_seconds";

/// Histogram: commit attempts a successful booking needed.
pub const COMMIT_ATTEMPTS: &str = "seatkeep_commit_attempts";

/// Counter: commits rejected because the seats were taken concurrently.
pub const COMMIT_CONFLICTS_TOTAL: &str = "seatkeep_commit_conflicts_total";

/// Counter: cancellation calls. Labels: outcome.
pub const CANCELLATIONS_TOTAL: &str = "seatkeep_cancellations_total";

/// Counter: modification calls. Labels: outcome.
pub const MODIFICATIONS_TOTAL: &str = "seatkeep_modifications_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "seatkeep_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "seatkeep_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "seatkeep_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "seatkeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "seatkeep_wal_flush_batch_size";

/// Counter: WAL rewrites.
pub const WAL_COMPACTIONS_TOTAL: &str = "seatkeep_wal_compactions_total";

/// Counter: reservations dropped by purges.
pub const RESERVATIONS_PURGED_TOTAL: &str = "seatkeep_reservations_purged_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
