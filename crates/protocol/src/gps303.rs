//! GPS303 ASCII dialect.
//!
//! Two frame shapes, each terminated by the end of the buffer:
//! - greeting: starts with `##`, carries no IMEI, is answered with the
//!   literal bytes `LOAD`;
//! - position: starts with `imei:`, at least 12 comma-separated fields:
//!   `imei:<IMEI>,tracker,YYMMDDhhmmss,,F,hhmmss.sss,A|V,DDMM.MMMM,N|S,DDDMM.MMMM,E|W,speed,...`

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use domain::models::CommandKind;

use crate::codec::{raw_command_bytes, DecodeOutcome, Decoded};
use crate::event::{PositionFix, TrackerEvent};

const GREETING_PREFIX: &[u8] = b"##";
const POSITION_PREFIX: &[u8] = b"imei:";

pub fn decode(buf: &[u8]) -> DecodeOutcome {
    if buf.starts_with(GREETING_PREFIX) {
        return DecodeOutcome::Frame(Decoded {
            event: TrackerEvent::Login {
                imei: None,
                type_code: None,
            },
            consumed: buf.len(),
        });
    }
    if buf.starts_with(POSITION_PREFIX) {
        return decode_position(buf);
    }
    if GREETING_PREFIX.starts_with(buf) || POSITION_PREFIX.starts_with(buf) {
        return DecodeOutcome::NeedMore;
    }
    DecodeOutcome::Reject
}

fn decode_position(buf: &[u8]) -> DecodeOutcome {
    let text = match std::str::from_utf8(buf) {
        Ok(text) => text,
        Err(_) => return DecodeOutcome::Reject,
    };
    let trimmed = text.trim_end_matches(['\r', '\n', ';']);
    let fields: Vec<&str> = trimmed.split(',').collect();
    if fields.len() < 12 {
        return DecodeOutcome::NeedMore;
    }

    let imei = fields[0].trim_start_matches("imei:").trim().to_string();
    let timestamp = decode_datetime(fields[2].trim());
    let valid = fields[6].trim() == "A";

    let latitude = match decode_coordinate(fields[7], fields[8], 'S') {
        Some(value) => value,
        None => return DecodeOutcome::Reject,
    };
    let longitude = match decode_coordinate(fields[9], fields[10], 'W') {
        Some(value) => value,
        None => return DecodeOutcome::Reject,
    };
    let speed = fields[11].trim().parse::<f64>().ok();

    DecodeOutcome::Frame(Decoded {
        event: TrackerEvent::Location {
            imei: Some(imei),
            fix: PositionFix {
                latitude,
                longitude,
                speed,
                course: None,
                altitude: None,
                timestamp,
                satellites: None,
                valid,
            },
        },
        consumed: buf.len(),
    })
}

/// `DDMM.MMMM` (or `DDDMM.MMMM`) to decimal degrees, negated when the
/// hemisphere field matches `negative`.
fn decode_coordinate(value: &str, hemisphere: &str, negative: char) -> Option<f64> {
    let raw: f64 = value.trim().parse().ok()?;
    let degrees = (raw / 100.0).trunc() + (raw % 100.0) / 60.0;
    if hemisphere.trim().starts_with(negative) {
        Some(-degrees)
    } else {
        Some(degrees)
    }
}

/// 12-digit `YYMMDDhhmmss`; anything else yields `None` and the caller
/// falls back to receipt time.
fn decode_datetime(field: &str) -> Option<DateTime<Utc>> {
    if field.len() != 12 || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let parsed = NaiveDateTime::parse_from_str(&format!("20{}", field), "%Y%m%d%H%M%S").ok()?;
    Some(Utc.from_utc_datetime(&parsed))
}

pub fn encode_auth_ack(_ok: bool) -> Vec<u8> {
    b"LOAD".to_vec()
}

pub fn encode_login_ack(_ok: bool) -> Vec<u8> {
    b"LOAD".to_vec()
}

pub fn encode_location_ack(_sequence: u8) -> Vec<u8> {
    b"ON".to_vec()
}

pub fn encode_heartbeat_ack() -> Vec<u8> {
    b"ON".to_vec()
}

pub fn encode_command(kind: &CommandKind, params: &serde_json::Value) -> Option<Vec<u8>> {
    match kind {
        CommandKind::Raw => raw_command_bytes(params),
        _ => None,
    }
}
