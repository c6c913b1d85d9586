//! Device repository for database operations.

use sqlx::PgPool;

use crate::entities::DeviceEntity;
use crate::metrics::QueryTimer;

/// Repository for device-related database operations.
#[derive(Clone)]
pub struct DeviceRepository {
    pool: PgPool,
}

impl DeviceRepository {
    /// Creates a new DeviceRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Find a device by its IMEI.
    pub async fn find_by_imei(&self, imei: &str) -> Result<Option<DeviceEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_device_by_imei");
        let result = sqlx::query_as::<_, DeviceEntity>(
            r#"
            SELECT id, imei, company_id, active, online,
                   last_seen, last_heartbeat, last_login, created_at, updated_at
            FROM devices
            WHERE imei = $1
            "#,
        )
        .bind(imei)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Set a device's online flag. Coming online also refreshes
    /// `last_seen`; going offline leaves it untouched so the last contact
    /// time survives.
    pub async fn set_online(&self, imei: &str, online: bool) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("set_device_online");
        let result = sqlx::query(
            r#"
            UPDATE devices
            SET online = $2,
                last_seen = CASE WHEN $2 THEN NOW() ELSE last_seen END,
                updated_at = NOW()
            WHERE imei = $1
            "#,
        )
        .bind(imei)
        .bind(online)
        .execute(&self.pool)
        .await?;
        timer.record();
        Ok(result.rows_affected())
    }

    /// Record a heartbeat: refreshes `last_heartbeat` and `last_seen` and
    /// implies the device is online.
    pub async fn touch_heartbeat(&self, imei: &str) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("touch_device_heartbeat");
        let result = sqlx::query(
            r#"
            UPDATE devices
            SET last_heartbeat = NOW(), last_seen = NOW(), online = true, updated_at = NOW()
            WHERE imei = $1
            "#,
        )
        .bind(imei)
        .execute(&self.pool)
        .await?;
        timer.record();
        Ok(result.rows_affected())
    }

    /// Record a login: refreshes `last_login` and `last_seen` and implies
    /// the device is online.
    pub async fn touch_login(&self, imei: &str) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("touch_device_login");
        let result = sqlx::query(
            r#"
            UPDATE devices
            SET last_login = NOW(), last_seen = NOW(), online = true, updated_at = NOW()
            WHERE imei = $1
            "#,
        )
        .bind(imei)
        .execute(&self.pool)
        .await?;
        timer.record();
        Ok(result.rows_affected())
    }
}
