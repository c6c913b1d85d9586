//! Device domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered tracker device.
///
/// Only devices with `active == true` are allowed to authenticate a TCP
/// session. `online` mirrors whether a session is currently open for the
/// device's IMEI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: i64,
    pub imei: String,
    pub company_id: Option<i64>,
    pub active: bool,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Checks that a wire-supplied IMEI is plausible: all ASCII digits, 15
/// digits (standard IMEI) or 16 (GT06 terminal id with its leading pad
/// digit).
pub fn is_valid_imei(imei: &str) -> bool {
    (imei.len() == 15 || imei.len() == 16) && imei.bytes().all(|b| b.is_ascii_digit())
}
