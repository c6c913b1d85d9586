//! Alert entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::{Alert, AlertKind};
use sqlx::FromRow;

/// Database row mapping for the alerts table.
#[derive(Debug, Clone, FromRow)]
pub struct AlertEntity {
    pub id: i64,
    pub device_id: i64,
    pub kind: String,
    pub message: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub triggered_at: DateTime<Utc>,
    pub raw: Option<String>,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

impl From<AlertEntity> for Alert {
    fn from(entity: AlertEntity) -> Self {
        Self {
            id: entity.id,
            device_id: entity.device_id,
            kind: AlertKind::parse(&entity.kind),
            message: entity.message,
            latitude: entity.latitude,
            longitude: entity.longitude,
            triggered_at: entity.triggered_at,
            raw: entity.raw,
            resolved: entity.resolved,
            created_at: entity.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_entity_to_domain() {
        let entity = AlertEntity {
            id: 5,
            device_id: 1,
            kind: "power_cut".to_string(),
            message: "power cut alarm".to_string(),
            latitude: Some(1.0),
            longitude: Some(2.0),
            triggered_at: Utc::now(),
            raw: None,
            resolved: false,
            created_at: Utc::now(),
        };
        let alert: Alert = entity.into();
        assert_eq!(alert.kind, AlertKind::PowerCut);
        assert!(!alert.resolved);
    }

    #[test]
    fn test_alert_entity_unknown_kind_maps_to_other() {
        let entity = AlertEntity {
            id: 5,
            device_id: 1,
            kind: "mystery".to_string(),
            message: String::new(),
            latitude: None,
            longitude: None,
            triggered_at: Utc::now(),
            raw: None,
            resolved: false,
            created_at: Utc::now(),
        };
        let alert: Alert = entity.into();
        assert_eq!(alert.kind, AlertKind::Other);
    }
}
