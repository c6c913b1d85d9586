//! Device entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::Device;
use sqlx::FromRow;

/// Database row mapping for the devices table.
#[derive(Debug, Clone, FromRow)]
pub struct DeviceEntity {
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

impl From<DeviceEntity> for Device {
    fn from(entity: DeviceEntity) -> Self {
        Self {
            id: entity.id,
            imei: entity.imei,
            company_id: entity.company_id,
            active: entity.active,
            online: entity.online,
            last_seen: entity.last_seen,
            last_heartbeat: entity.last_heartbeat,
            last_login: entity.last_login,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}
