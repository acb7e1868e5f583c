use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "intrabook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "intrabook_query_duration_seconds";

// ── Booking metrics ─────────────────────────────────────────────

/// Counter: bookings committed, one per created occurrence.
pub const BOOKINGS_CREATED_TOTAL: &str = "intrabook_bookings_created_total";

/// Counter: recurring occurrences skipped because they failed validation.
pub const OCCURRENCES_SKIPPED_TOTAL: &str = "intrabook_occurrences_skipped_total";

/// Counter: requests rejected for overlapping a confirmed booking.
pub const BOOKING_CONFLICTS_TOTAL: &str = "intrabook_booking_conflicts_total";

/// Counter: reminder notices sent.
pub const REMINDERS_SENT_TOTAL: &str = "intrabook_reminders_sent_total";

/// Counter: daily booking summaries sent.
pub const DAILY_SUMMARIES_SENT_TOTAL: &str = "intrabook_daily_summaries_sent_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "intrabook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "intrabook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "intrabook_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "intrabook_tenants_active";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "intrabook_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "intrabook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "intrabook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertResource(_) => "insert_resource",
        Command::UpdateResource(_) => "update_resource",
        Command::DeleteResource { .. } => "delete_resource",
        Command::SelectResources => "select_resources",
        Command::InsertBooking { recurrence: Some(_), .. } => "insert_recurring_booking",
        Command::InsertBooking { .. } => "insert_booking",
        Command::ExtendBooking { .. } => "extend_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectFreeWindows { .. } => "select_free_windows",
        Command::SelectStats => "select_stats",
        Command::Listen { .. } => "listen",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::parse_sql;

    #[test]
    fn recurring_inserts_get_their_own_label() {
        let single = parse_sql(
            "INSERT INTO bookings (id, resource_id, starts_at, ends_at) \
             VALUES ('01ARZ3NDEKTSV4RRFFQ69G5FAV', '01ARZ3NDEKTSV4RRFFQ69G5FAV', 1000, 2000)",
        )
        .unwrap();
        let recurring = parse_sql(
            "INSERT INTO bookings (id, resource_id, starts_at, ends_at, recurrence, until) \
             VALUES ('01ARZ3NDEKTSV4RRFFQ69G5FAV', '01ARZ3NDEKTSV4RRFFQ69G5FAV', 1000, 2000, 'daily', '2025-01-31')",
        )
        .unwrap();
        assert_eq!(command_label(&single), "insert_booking");
        assert_eq!(command_label(&recurring), "insert_recurring_booking");
        assert_eq!(command_label(&parse_sql("SELECT * FROM stats").unwrap()), "select_stats");
    }
}
