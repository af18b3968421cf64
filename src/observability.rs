use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "mentord_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "mentord_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "mentord_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "mentord_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "mentord_connections_rejected_total";

/// Counter: meeting-link provisioning failures downgraded to fallback links.
pub const MEETING_FALLBACKS_TOTAL: &str = "mentord_meeting_fallbacks_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "mentord_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "mentord_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertMentor { .. } => "insert_mentor",
        Command::InsertStudent { .. } => "insert_student",
        Command::InsertRule { .. } => "insert_rule",
        Command::DeleteRule { .. } => "delete_rule",
        Command::InsertSession { .. } => "insert_session",
        Command::UpdateSessionStatus { .. } => "update_session_status",
        Command::RateSession { .. } => "rate_session",
        Command::DeleteSession { .. } => "delete_session",
        Command::InsertReschedule { .. } => "insert_reschedule",
        Command::ResolveReschedule { .. } => "resolve_reschedule",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectSessions { .. } => "select_sessions",
        Command::SelectJoinInfo { .. } => "select_join_info",
        Command::SelectRules { .. } => "select_rules",
        Command::SelectMentors => "select_mentors",
        Command::SelectStudents => "select_students",
    }
}
