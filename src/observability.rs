use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "stayrate_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "stayrate_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "stayrate_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "stayrate_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "stayrate_connections_rejected_total";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "stayrate_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "stayrate_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "stayrate_wal_flush_batch_size";

// ── Domain metrics ──────────────────────────────────────────────

/// Gauge: registered properties.
pub const PROPERTIES_ACTIVE: &str = "stayrate_properties_active";

/// Counter: price range writes. Labels: op (add, update, remove, bulk), status.
pub const RANGE_WRITES_TOTAL: &str = "stayrate_range_writes_total";

/// Counter: reservation requests. Labels: outcome (accepted, rejected, error), stage.
pub const RESERVATIONS_TOTAL: &str = "stayrate_reservations_total";

/// Counter: reservation status changes. Labels: to.
pub const STATUS_CHANGES_TOTAL: &str = "stayrate_status_changes_total";

/// Counter: reservations moved to completed by the sweeper.
pub const SWEEP_COMPLETED_TOTAL: &str = "stayrate_sweep_completed_total";

/// Counter: WAL compactions triggered by the sweeper. Labels: status.
pub const SWEEP_COMPACTIONS_TOTAL: &str = "stayrate_sweep_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertProperty { .. } => "insert_property",
        Command::UpdateProperty { .. } => "update_property",
        Command::DeleteProperty { .. } => "delete_property",
        Command::SelectProperties { .. } => "select_properties",
        Command::InsertRange { .. } => "insert_range",
        Command::BulkInsertRanges { .. } => "bulk_insert_ranges",
        Command::UpdateRange { .. } => "update_range",
        Command::DeleteRange { .. } => "delete_range",
        Command::SelectRanges { .. } => "select_ranges",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::UpdateReservationStatus { .. } => "update_reservation_status",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectQuote { .. } => "select_quote",
        Command::SelectEstimate { .. } => "select_estimate",
        Command::SelectCalendar { .. } => "select_calendar",
        Command::SelectDayStatus { .. } => "select_day_status",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
        Command::UnlistenAll => "unlisten_all",
    }
}
