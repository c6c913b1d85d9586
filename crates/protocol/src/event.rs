//! Typed events decoded from device frames.

use chrono::{DateTime, Utc};
use domain::models::AlertKind;

/// A decoded GPS position.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Speed as reported on the wire (km/h for GT06, raw field for ASCII
    /// dialects).
    pub speed: Option<f64>,
    /// Course over ground in degrees.
    pub course: Option<f64>,
    pub altitude: Option<f64>,
    /// Frame timestamp; absent when the dialect carries none or the field
    /// failed to parse. Callers fall back to receipt time.
    pub timestamp: Option<DateTime<Utc>>,
    pub satellites: Option<i16>,
    /// Whether the device reported a valid fix.
    pub valid: bool,
}

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    /// Device identification. GPS303 greeting frames carry no IMEI; the
    /// session stays unauthenticated until a later frame provides one.
    Login {
        imei: Option<String>,
        type_code: Option<u16>,
    },
    /// A position report. ASCII dialects embed the IMEI in every position
    /// frame, which doubles as authentication.
    Location {
        imei: Option<String>,
        fix: PositionFix,
    },
    Heartbeat,
    Alarm {
        kind: AlertKind,
        fix: Option<PositionFix>,
        message: String,
    },
    /// Device reply to a previously sent command.
    CommandResponse { content: String },
    /// Produced by the generic fallback (and for unrecognized GT06 message
    /// types): raw bytes as hex plus a printable-ASCII view.
    Unknown {
        hex: String,
        printable: String,
        length: usize,
    },
}

impl TrackerEvent {
    /// The IMEI carried by this event, if any.
    pub fn imei(&self) -> Option<&str> {
        match self {
            TrackerEvent::Login { imei, .. } | TrackerEvent::Location { imei, .. } => {
                imei.as_deref()
            }
            _ => None,
        }
    }

    /// Stable name used as the `type` field of bus envelopes.
    pub fn kind_str(&self) -> &'static str {
        match self {
            TrackerEvent::Login { .. } => "login",
            TrackerEvent::Location { .. } => "location",
            TrackerEvent::Heartbeat => "heartbeat",
            TrackerEvent::Alarm { .. } => "alarm",
            TrackerEvent::CommandResponse { .. } => "command_response",
            TrackerEvent::Unknown { .. } => "unknown",
        }
    }
}
