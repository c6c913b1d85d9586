//! Alert domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a device alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Sos,
    PowerCut,
    Vibration,
    FenceIn,
    FenceOut,
    OverSpeed,
    Normal,
    Other,
}

impl AlertKind {
    /// Stable string form used in the store and on the bus.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Sos => "sos",
            AlertKind::PowerCut => "power_cut",
            AlertKind::Vibration => "vibration",
            AlertKind::FenceIn => "fence_in",
            AlertKind::FenceOut => "fence_out",
            AlertKind::OverSpeed => "over_speed",
            AlertKind::Normal => "normal",
            AlertKind::Other => "other",
        }
    }

    /// Parses the stable string form; anything unrecognized is `Other`.
    pub fn parse(s: &str) -> AlertKind {
        match s {
            "sos" => AlertKind::Sos,
            "power_cut" => AlertKind::PowerCut,
            "vibration" => AlertKind::Vibration,
            "fence_in" => AlertKind::FenceIn,
            "fence_out" => AlertKind::FenceOut,
            "over_speed" => AlertKind::OverSpeed,
            "normal" => AlertKind::Normal,
            _ => AlertKind::Other,
        }
    }
}

/// A persisted device alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: i64,
    pub device_id: i64,
    pub kind: AlertKind,
    pub message: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub triggered_at: DateTime<Utc>,
    pub raw: Option<String>,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

/// Input data for inserting an alert record. New alerts are unresolved.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub device_id: i64,
    pub kind: AlertKind,
    pub message: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub triggered_at: DateTime<Utc>,
    pub raw: Option<String>,
}
