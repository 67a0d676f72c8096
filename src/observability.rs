use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "adspace_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "adspace_query_duration_seconds";

/// Counter: attach attempts rejected because the billboard was already booked.
pub const ATTACH_CONFLICTS_TOTAL: &str = "adspace_attach_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "adspace_connections_active";
pub const CONNECTIONS_TOTAL: &str = "adspace_connections_total";
pub const CONNECTIONS_REJECTED_TOTAL: &str = "adspace_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "adspace_wal_flush_duration_seconds";

/// Histogram: events per WAL group commit.
pub const WAL_FLUSH_BATCH_SIZE: &str = "adspace_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "adspace_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op when `port` is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metric label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertLocation(_) => "insert_location",
        Command::InsertBillboard(_) => "insert_billboard",
        Command::InsertCampaign(_) => "insert_campaign",
        Command::UpdateLocation { .. } => "update_location",
        Command::UpdateBillboard { .. } => "update_billboard",
        Command::UpdateCampaign { .. } => "update_campaign",
        Command::Delete { .. } => "soft_delete",
        Command::Select { .. } => "select_entities",
        Command::Attach { .. } => "attach",
        Command::Detach { .. } => "detach",
        Command::SelectAvailability { .. } => "select_availability",
        Command::CheckAvailability { .. } => "check_availability",
        Command::SelectSummary { .. } => "select_summary",
        Command::SelectLinks(_) => "select_links",
        Command::SelectBillboardsAt { .. } => "select_billboards_at",
    }
}
