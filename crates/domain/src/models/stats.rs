//! Aggregate system statistics.

use serde::Serialize;

/// Snapshot counts returned by the store adapter's stats query.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    pub devices_total: i64,
    pub devices_online: i64,
    pub locations_24h: i64,
    pub alerts_open: i64,
    pub commands_pending: i64,
}
