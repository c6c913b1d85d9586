//! GT06 binary dialect (big-endian).
//!
//! Frame layout:
//! `0x78 0x78 | len(1) | proto(1) | payload(len-1-2) | crc(2) | 0x0D 0x0A`
//! where `len` covers proto + payload + crc, so a complete frame is
//! `len + 5` bytes.
//!
//! The checksum is an additive 16-bit sum over the bytes from `len` through
//! the end of the payload. Vendor documents specify ITU CRC-16 instead;
//! field devices have been observed to accept the additive sum, so it is
//! kept behind [`checksum`] where it can be swapped wholesale. Inbound
//! frames with a mismatching checksum are logged and decoded anyway.

use chrono::{TimeZone, Utc};
use domain::models::{AlertKind, CommandKind};
use tracing::debug;

use crate::codec::{raw_command_bytes, DecodeOutcome, Decoded};
use crate::event::{PositionFix, TrackerEvent};

const START: [u8; 2] = [0x78, 0x78];
const STOP: [u8; 2] = [0x0D, 0x0A];

const MSG_LOGIN: u8 = 0x01;
const MSG_LOCATION: u8 = 0x12;
const MSG_HEARTBEAT: u8 = 0x13;
const MSG_COMMAND_RESPONSE: u8 = 0x15;
const MSG_ALARM: u8 = 0x16;

/// Additive 16-bit checksum used by the frame codec.
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)))
}

/// Decodes one frame from the front of `buf`.
pub fn decode(buf: &[u8]) -> DecodeOutcome {
    if buf.is_empty() {
        return DecodeOutcome::NeedMore;
    }
    if buf[0] != START[0] {
        return DecodeOutcome::Reject;
    }
    if buf.len() < 2 {
        return DecodeOutcome::NeedMore;
    }
    if buf[1] != START[1] {
        return DecodeOutcome::Reject;
    }
    if buf.len() < 3 {
        return DecodeOutcome::NeedMore;
    }

    let len = buf[2] as usize;
    if len < 3 {
        return DecodeOutcome::Reject;
    }
    let total = len + 5;
    if buf.len() < total {
        return DecodeOutcome::NeedMore;
    }
    if buf[total - 2..total] != STOP {
        return DecodeOutcome::Reject;
    }

    let proto = buf[3];
    let payload = &buf[4..len + 1];
    let wire_crc = u16::from_be_bytes([buf[len + 1], buf[len + 2]]);
    let computed = checksum(&buf[2..len + 1]);
    if wire_crc != computed {
        debug!(proto, wire_crc, computed, "gt06 checksum mismatch, decoding anyway");
    }

    let event = match proto {
        MSG_LOGIN => decode_login(payload),
        MSG_LOCATION => decode_location(payload).map(|fix| TrackerEvent::Location {
            imei: None,
            fix,
        }),
        MSG_HEARTBEAT => Some(TrackerEvent::Heartbeat),
        MSG_ALARM => decode_alarm(payload),
        MSG_COMMAND_RESPONSE => Some(decode_command_response(payload)),
        _ => Some(unknown_event(&buf[..total])),
    };

    match event {
        Some(event) => DecodeOutcome::Frame(Decoded {
            event,
            consumed: total,
        }),
        None => DecodeOutcome::Reject,
    }
}

fn decode_login(payload: &[u8]) -> Option<TrackerEvent> {
    if payload.len() < 8 {
        return None;
    }
    let imei: String = payload[..8].iter().map(|b| format!("{:02x}", b)).collect();
    let type_code = if payload.len() >= 10 {
        Some(u16::from_be_bytes([payload[8], payload[9]]))
    } else {
        None
    };
    Some(TrackerEvent::Login {
        imei: Some(imei),
        type_code,
    })
}

fn decode_location(payload: &[u8]) -> Option<PositionFix> {
    if payload.len() < 18 {
        return None;
    }

    let timestamp = decode_datetime(&payload[..6]);
    let satellites = i16::from(payload[6] & 0x0F);

    let raw_lat = u32::from_be_bytes([payload[7], payload[8], payload[9], payload[10]]);
    let raw_lon = u32::from_be_bytes([payload[11], payload[12], payload[13], payload[14]]);
    let mut latitude = f64::from(raw_lat) / 1_800_000.0;
    let mut longitude = f64::from(raw_lon) / 1_800_000.0;

    let speed = f64::from(payload[15]);
    let flags = payload[16];
    let course = f64::from((u16::from(flags & 0x03) << 8) | u16::from(payload[17]));

    // Course/status flag bits: 0x10 fix valid, 0x04 north, 0x08 west.
    let valid = flags & 0x10 != 0;
    if flags & 0x04 == 0 {
        latitude = -latitude;
    }
    if flags & 0x08 != 0 {
        longitude = -longitude;
    }

    Some(PositionFix {
        latitude,
        longitude,
        speed: Some(speed),
        course: Some(course),
        altitude: None,
        timestamp,
        satellites: Some(satellites),
        valid,
    })
}

fn decode_alarm(payload: &[u8]) -> Option<TrackerEvent> {
    if payload.len() < 19 {
        return None;
    }
    let fix = decode_location(&payload[..18]);
    let code = payload[18];
    let (kind, message) = alarm_kind(code);
    Some(TrackerEvent::Alarm {
        kind,
        fix,
        message,
    })
}

fn alarm_kind(code: u8) -> (AlertKind, String) {
    match code {
        0x00 => (AlertKind::Normal, "normal status report".to_string()),
        0x01 => (AlertKind::Sos, "SOS alarm".to_string()),
        0x02 => (AlertKind::PowerCut, "power cut alarm".to_string()),
        0x03 => (AlertKind::Vibration, "vibration alarm".to_string()),
        0x04 => (AlertKind::FenceIn, "entered fence".to_string()),
        0x05 => (AlertKind::FenceOut, "left fence".to_string()),
        0x06 => (AlertKind::OverSpeed, "over speed alarm".to_string()),
        other => (AlertKind::Other, format!("alarm 0x{:02X}", other)),
    }
}

fn decode_command_response(payload: &[u8]) -> TrackerEvent {
    // Server flag (4 bytes) precedes the reply text; some firmwares prepend
    // a content-length byte as well, which lands in the flag region.
    let content_bytes = if payload.len() > 5 {
        &payload[5..]
    } else {
        payload
    };
    let content: String = content_bytes
        .iter()
        .filter(|b| (0x20..0x7F).contains(*b))
        .map(|b| *b as char)
        .collect();
    TrackerEvent::CommandResponse { content }
}

fn decode_datetime(bytes: &[u8]) -> Option<chrono::DateTime<Utc>> {
    let year = 2000 + i32::from(bytes[0]);
    Utc.with_ymd_and_hms(
        year,
        u32::from(bytes[1]),
        u32::from(bytes[2]),
        u32::from(bytes[3]),
        u32::from(bytes[4]),
        u32::from(bytes[5]),
    )
    .single()
}

fn unknown_event(frame: &[u8]) -> TrackerEvent {
    let hex: String = frame.iter().map(|b| format!("{:02x}", b)).collect();
    let printable: String = frame
        .iter()
        .map(|b| {
            if (0x20..0x7F).contains(b) {
                *b as char
            } else {
                '.'
            }
        })
        .collect();
    TrackerEvent::Unknown {
        hex,
        printable,
        length: frame.len(),
    }
}

/// Frames an ack payload: `len` counts the data bytes only.
fn frame_ack(data: &[u8]) -> Vec<u8> {
    frame_with_len(data, data.len() as u8)
}

/// Frames a command payload: `len` counts the data bytes plus one.
fn frame_command(data: &[u8]) -> Vec<u8> {
    frame_with_len(data, data.len() as u8 + 1)
}

fn frame_with_len(data: &[u8], len: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 7);
    out.extend_from_slice(&START);
    out.push(len);
    out.extend_from_slice(data);
    let crc = checksum(&out[2..]);
    out.extend_from_slice(&crc.to_be_bytes());
    out.extend_from_slice(&STOP);
    out
}

pub fn encode_auth_ack(ok: bool) -> Vec<u8> {
    frame_ack(&[MSG_LOGIN, u8::from(ok)])
}

pub fn encode_login_ack(ok: bool) -> Vec<u8> {
    encode_auth_ack(ok)
}

pub fn encode_location_ack(sequence: u8) -> Vec<u8> {
    frame_ack(&[0x05, 0x01, sequence])
}

pub fn encode_heartbeat_ack() -> Vec<u8> {
    frame_ack(&[MSG_HEARTBEAT, 0x01])
}

pub fn encode_command(kind: &CommandKind, params: &serde_json::Value) -> Option<Vec<u8>> {
    match kind {
        CommandKind::Locate => Some(frame_command(&[0x80, 0x01, 0x01, 0x01])),
        CommandKind::Reboot => Some(frame_command(&[0x80, 0x02, 0x01, 0x01])),
        CommandKind::EngineStop => Some(frame_command(&[0x80, 0x05, 0x01, 0x01])),
        CommandKind::EngineResume => Some(frame_command(&[0x80, 0x05, 0x01, 0x00])),
        CommandKind::Raw => raw_command_bytes(params).map(|data| frame_command(&data)),
    }
}
