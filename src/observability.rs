use std::net::SocketAddr;

use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests executed. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "locum_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "locum_request_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "locum_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "locum_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "locum_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "locum_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "locum_wal_flush_batch_size";

/// Counter: events replayed from the WAL at startup.
pub const WAL_REPLAYED_EVENTS: &str = "locum_wal_replayed_events_total";

/// Counter: WAL compactions performed.
pub const WAL_COMPACTIONS: &str = "locum_wal_compactions_total";

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

/// Map a Request variant to a short label for metrics.
pub fn request_label(req: &Request) -> &'static str {
    match req {
        Request::CreateQualification { .. } => "create_qualification",
        Request::UpdateQualification { .. } => "update_qualification",
        Request::DeleteQualification { .. } => "delete_qualification",
        Request::ListQualifications => "list_qualifications",
        Request::CreateSubject { .. } => "create_subject",
        Request::UpdateSubject { .. } => "update_subject",
        Request::DeleteSubject { .. } => "delete_subject",
        Request::ListSubjects => "list_subjects",
        Request::CreateLecturer { .. } => "create_lecturer",
        Request::UpdateLecturer { .. } => "update_lecturer",
        Request::DeleteLecturer { .. } => "delete_lecturer",
        Request::ListLecturers => "list_lecturers",
        Request::ScheduleSession { .. } => "schedule_session",
        Request::CancelSession { .. } => "cancel_session",
        Request::SetNeedsSubstitution { .. } => "set_needs_substitution",
        Request::ListSessions { .. } => "list_sessions",
        Request::OpenSessions => "open_sessions",
        Request::PreviewEligibility { .. } => "preview_eligibility",
        Request::Candidates { .. } => "candidates",
        Request::Assign { .. } => "assign",
        Request::WeeklyLoad { .. } => "weekly_load",
        Request::WeeklyRanking { .. } => "weekly_ranking",
    }
}
