//! Location entities (database row mappings).

use chrono::{DateTime, Utc};
use domain::models::Location;
use sqlx::FromRow;

/// Database row mapping for the locations table.
#[derive(Debug, Clone, FromRow)]
pub struct LocationEntity {
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

/// Result row of a radius query: a device's latest position plus its
/// great-circle distance from the probe point.
#[derive(Debug, Clone, FromRow)]
pub struct NearbyDeviceEntity {
    pub device_id: i64,
    pub imei: String,
    pub latitude: f64,
    pub longitude: f64,
    pub recorded_at: DateTime<Utc>,
    pub distance_meters: f64,
}

impl From<LocationEntity> for Location {
    fn from(entity: LocationEntity) -> Self {
        Self {
            id: entity.id,
            device_id: entity.device_id,
            latitude: entity.latitude,
            longitude: entity.longitude,
            speed: entity.speed,
            course: entity.course,
            altitude: entity.altitude,
            recorded_at: entity.recorded_at,
            satellites: entity.satellites,
            hdop: entity.hdop,
            battery_level: entity.battery_level,
            signal_strength: entity.signal_strength,
            raw: entity.raw,
            created_at: entity.created_at,
        }
    }
}
