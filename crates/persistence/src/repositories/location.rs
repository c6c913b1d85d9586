//! Location repository for database operations.
//!
//! The `geom` column is a WGS84 geography point built from (lon, lat);
//! radius queries use great-circle distance via `ST_DWithin`.

use chrono::{DateTime, Utc};
use domain::models::NewLocation;
use sqlx::PgPool;

use crate::entities::{LocationEntity, NearbyDeviceEntity};
use crate::metrics::QueryTimer;

/// Repository for location-related database operations.
#[derive(Clone)]
pub struct LocationRepository {
    pool: PgPool,
}

impl LocationRepository {
    /// Creates a new LocationRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a single location record.
    pub async fn insert(&self, input: NewLocation) -> Result<LocationEntity, sqlx::Error> {
        let timer = QueryTimer::new("insert_location");
        let result = sqlx::query_as::<_, LocationEntity>(
            r#"
            INSERT INTO locations (
                device_id, latitude, longitude, speed, course, altitude,
                recorded_at, satellites, hdop, battery_level, signal_strength,
                raw, geom
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                    ST_SetSRID(ST_MakePoint($3, $2), 4326)::geography)
            RETURNING id, device_id, latitude, longitude, speed, course, altitude,
                      recorded_at, satellites, hdop, battery_level, signal_strength,
                      raw, created_at
            "#,
        )
        .bind(input.device_id)
        .bind(input.latitude)
        .bind(input.longitude)
        .bind(input.speed)
        .bind(input.course)
        .bind(input.altitude)
        .bind(input.recorded_at)
        .bind(input.satellites)
        .bind(input.hdop)
        .bind(input.battery_level)
        .bind(input.signal_strength)
        .bind(&input.raw)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Latest position for a device.
    pub async fn last_for_device(
        &self,
        device_id: i64,
    ) -> Result<Option<LocationEntity>, sqlx::Error> {
        let timer = QueryTimer::new("get_last_location");
        let result = sqlx::query_as::<_, LocationEntity>(
            r#"
            SELECT id, device_id, latitude, longitude, speed, course, altitude,
                   recorded_at, satellites, hdop, battery_level, signal_strength,
                   raw, created_at
            FROM locations
            WHERE device_id = $1
            ORDER BY recorded_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Position history for a device within an optional time range,
    /// newest first.
    pub async fn history(
        &self,
        device_id: i64,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<LocationEntity>, sqlx::Error> {
        let timer = QueryTimer::new("get_location_history");
        let result = sqlx::query_as::<_, LocationEntity>(
            r#"
            SELECT id, device_id, latitude, longitude, speed, course, altitude,
                   recorded_at, satellites, hdop, battery_level, signal_strength,
                   raw, created_at
            FROM locations
            WHERE device_id = $1
              AND ($2::timestamptz IS NULL OR recorded_at >= $2)
              AND ($3::timestamptz IS NULL OR recorded_at <= $3)
            ORDER BY recorded_at DESC, id DESC
            LIMIT $4
            "#,
        )
        .bind(device_id)
        .bind(from)
        .bind(to)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Devices whose latest position lies within `radius_km` of the probe
    /// point, nearest first.
    pub async fn nearby(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
    ) -> Result<Vec<NearbyDeviceEntity>, sqlx::Error> {
        let timer = QueryTimer::new("get_nearby_devices");
        let result = sqlx::query_as::<_, NearbyDeviceEntity>(
            r#"
            WITH latest AS (
                SELECT DISTINCT ON (l.device_id)
                       l.device_id, l.latitude, l.longitude, l.recorded_at, l.geom
                FROM locations l
                ORDER BY l.device_id, l.recorded_at DESC, l.id DESC
            )
            SELECT latest.device_id, d.imei, latest.latitude, latest.longitude,
                   latest.recorded_at,
                   ST_Distance(latest.geom, ST_SetSRID(ST_MakePoint($2, $1), 4326)::geography)
                       AS distance_meters
            FROM latest
            JOIN devices d ON d.id = latest.device_id
            WHERE ST_DWithin(
                latest.geom,
                ST_SetSRID(ST_MakePoint($2, $1), 4326)::geography,
                $3
            )
            ORDER BY distance_meters ASC
            "#,
        )
        .bind(latitude)
        .bind(longitude)
        .bind(radius_km * 1000.0)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }
}
