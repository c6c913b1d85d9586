//! Location domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// A persisted position report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub id: i64,
    pub device_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,
    pub course: Option<f64>,
    pub altitude: Option<f64>,
    pub recorded_at: DateTime<Utc>,
    pub satellites: Option<i16>,
    pub hdop: Option<f64>,
    pub battery_level: Option<i16>,
    pub signal_strength: Option<i16>,
    pub raw: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input data for inserting a location record.
///
/// `recorded_at` is the frame timestamp when the protocol carries one,
/// otherwise the receipt time.
#[derive(Debug, Clone, Validate)]
pub struct NewLocation {
    pub device_id: i64,

    #[validate(range(min = -90.0, max = 90.0, message = "Latitude must be within [-90, 90]"))]
    pub latitude: f64,

    #[validate(range(
        min = -180.0,
        max = 180.0,
        message = "Longitude must be within [-180, 180]"
    ))]
    pub longitude: f64,

    pub speed: Option<f64>,
    pub course: Option<f64>,
    pub altitude: Option<f64>,
    pub recorded_at: DateTime<Utc>,
    pub satellites: Option<i16>,
    pub hdop: Option<f64>,
    pub battery_level: Option<i16>,
    pub signal_strength: Option<i16>,
    pub raw: Option<String>,
}
