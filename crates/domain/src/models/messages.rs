//! Message-bus envelope types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inbound payload on the `device_commands` queue.
///
/// Producers are inconsistent: `commandId` and `command_id` are accepted as
/// synonyms for `id`, and `command_type`/`kind` as synonyms for `command`.
/// Every field is optional so a malformed payload deserializes rather than
/// erroring; the dispatcher decides what is usable.
///
/// The `target_*` fields mark a payload for the direct-TCP sidecar rather
/// than the session dispatcher.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandEnvelope {
    #[serde(default, alias = "commandId", alias = "command_id")]
    pub id: Option<String>,

    #[serde(default)]
    pub device_id: Option<i64>,

    #[serde(default)]
    pub imei: Option<String>,

    #[serde(default, alias = "command_type", alias = "kind")]
    pub command: Option<String>,

    #[serde(default, alias = "params", alias = "payload")]
    pub parameters: Option<serde_json::Value>,

    #[serde(default, alias = "targetHost")]
    pub target_host: Option<String>,

    #[serde(default, alias = "targetPort")]
    pub target_port: Option<u16>,

    #[serde(default, alias = "rawCommand")]
    pub raw_command: Option<String>,
}

impl CommandEnvelope {
    /// True when the payload belongs to the direct-TCP sidecar bridge.
    pub fn is_direct_tcp(&self) -> bool {
        self.target_host.is_some()
    }
}

/// Envelope published to `tracker_messages`, `device_alerts` and
/// `location_updates`.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerBusMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub imei: String,
    pub device_id: i64,
    pub data: serde_json::Value,
    pub received_at: DateTime<Utc>,
    pub source: String,
    pub timestamp: i64,
}

impl TrackerBusMessage {
    /// Builds an envelope stamped with the receipt time.
    pub fn new(kind: &str, imei: &str, device_id: i64, data: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            kind: kind.to_string(),
            imei: imei.to_string(),
            device_id,
            data,
            received_at: now,
            source: "tcp-gateway".to_string(),
            timestamp: now.timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_canonical_fields() {
        let envelope: CommandEnvelope = serde_json::from_value(json!({
            "id": "c2",
            "device_id": 12,
            "imei": "359710045490084",
            "command": "engine_stop",
            "parameters": {"force": true}
        }))
        .unwrap();
        assert_eq!(envelope.id.as_deref(), Some("c2"));
        assert_eq!(envelope.device_id, Some(12));
        assert_eq!(envelope.command.as_deref(), Some("engine_stop"));
        assert!(!envelope.is_direct_tcp());
    }

    #[test]
    fn test_envelope_command_id_alias() {
        let envelope: CommandEnvelope = serde_json::from_value(json!({
            "commandId": "c1",
            "imei": "999",
            "command": "locate"
        }))
        .unwrap();
        assert_eq!(envelope.id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_envelope_command_type_alias() {
        let envelope: CommandEnvelope = serde_json::from_value(json!({
            "id": "c3",
            "command_type": "reboot"
        }))
        .unwrap();
        assert_eq!(envelope.command.as_deref(), Some("reboot"));

        let envelope: CommandEnvelope = serde_json::from_value(json!({
            "id": "c4",
            "kind": "locate"
        }))
        .unwrap();
        assert_eq!(envelope.command.as_deref(), Some("locate"));
    }

    #[test]
    fn test_envelope_tolerates_missing_fields() {
        let envelope: CommandEnvelope = serde_json::from_value(json!({})).unwrap();
        assert!(envelope.id.is_none());
        assert!(envelope.imei.is_none());
        assert!(envelope.command.is_none());
    }

    #[test]
    fn test_envelope_sidecar_discriminator() {
        let envelope: CommandEnvelope = serde_json::from_value(json!({
            "targetHost": "10.0.0.5",
            "targetPort": 7700,
            "rawCommand": "RELAY,1#"
        }))
        .unwrap();
        assert!(envelope.is_direct_tcp());
        assert_eq!(envelope.target_port, Some(7700));
        assert_eq!(envelope.raw_command.as_deref(), Some("RELAY,1#"));
    }

    #[test]
    fn test_bus_message_shape() {
        let message =
            TrackerBusMessage::new("location", "359710045490084", 12, json!({"lat": 1.0}));
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "location");
        assert_eq!(value["imei"], "359710045490084");
        assert_eq!(value["device_id"], 12);
        assert_eq!(value["source"], "tcp-gateway");
        assert!(value["timestamp"].is_i64());
        assert!(value.get("received_at").is_some());
    }
}
