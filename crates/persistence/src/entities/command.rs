//! Command entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::{Command, CommandKind, CommandStatus};
use sqlx::FromRow;

/// Database row mapping for the commands table.
#[derive(Debug, Clone, FromRow)]
pub struct CommandEntity {
    pub id: String,
    pub device_id: i64,
    pub kind: String,
    pub payload: Option<serde_json::Value>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub ack_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub response: Option<String>,
    pub error: Option<String>,
}

impl From<CommandEntity> for Command {
    fn from(entity: CommandEntity) -> Self {
        Self {
            id: entity.id,
            device_id: entity.device_id,
            kind: CommandKind::parse(&entity.kind).unwrap_or(CommandKind::Raw),
            payload: entity.payload,
            status: CommandStatus::parse(&entity.status).unwrap_or(CommandStatus::Pending),
            created_at: entity.created_at,
            sent_at: entity.sent_at,
            ack_at: entity.ack_at,
            failed_at: entity.failed_at,
            response: entity.response,
            error: entity.error,
        }
    }
}
