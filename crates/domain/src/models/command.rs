//! Command domain models.
//!
//! Commands travel from the durable queue to a connected device socket. The
//! row in the store is the single observable record of the outcome, so the
//! status machine is strictly monotonic: `pending -> sent -> acknowledged`,
//! with `failed` reachable from `pending` or `sent` only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supported command kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Locate,
    Reboot,
    EngineStop,
    EngineResume,
    Raw,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Locate => "locate",
            CommandKind::Reboot => "reboot",
            CommandKind::EngineStop => "engine_stop",
            CommandKind::EngineResume => "engine_resume",
            CommandKind::Raw => "raw",
        }
    }

    /// Parses a command name from a queue payload. Producers are not
    /// consistent about casing or separators, so `engineStop`,
    /// `engine-stop` and `ENGINE_STOP` all resolve to the same kind.
    pub fn parse(s: &str) -> Option<CommandKind> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "locate" => Some(CommandKind::Locate),
            "reboot" => Some(CommandKind::Reboot),
            "enginestop" => Some(CommandKind::EngineStop),
            "engineresume" => Some(CommandKind::EngineResume),
            "raw" => Some(CommandKind::Raw),
            _ => None,
        }
    }
}

/// Command delivery status.
///
/// `Failed` and `Acknowledged` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Sent,
    Acknowledged,
    Failed,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Sent => "sent",
            CommandStatus::Acknowledged => "acknowledged",
            CommandStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<CommandStatus> {
        match s {
            "pending" => Some(CommandStatus::Pending),
            "sent" => Some(CommandStatus::Sent),
            "acknowledged" => Some(CommandStatus::Acknowledged),
            "failed" => Some(CommandStatus::Failed),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` respects the status machine.
    pub fn can_transition(self, next: CommandStatus) -> bool {
        matches!(
            (self, next),
            (CommandStatus::Pending, CommandStatus::Sent)
                | (CommandStatus::Pending, CommandStatus::Failed)
                | (CommandStatus::Sent, CommandStatus::Acknowledged)
                | (CommandStatus::Sent, CommandStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CommandStatus::Acknowledged | CommandStatus::Failed)
    }
}

/// A persisted device command.
///
/// Ids are opaque producer-supplied strings, not UUIDs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub id: String,
    pub device_id: i64,
    pub kind: CommandKind,
    pub payload: Option<serde_json::Value>,
    pub status: CommandStatus,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub ack_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub response: Option<String>,
    pub error: Option<String>,
}
