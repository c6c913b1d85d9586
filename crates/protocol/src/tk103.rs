//! TK103 ASCII dialect.
//!
//! Frames start with `##` and are comma-separated; a field beginning with
//! `imei:` identifies the device. In the detection order GPS303 claims `##`
//! streams first, so this sub-codec only drives sessions whose fingerprint
//! was pinned to it explicitly.

use domain::models::CommandKind;

use crate::codec::{raw_command_bytes, DecodeOutcome, Decoded};
use crate::event::TrackerEvent;

const PREFIX: &[u8] = b"##";

pub fn decode(buf: &[u8]) -> DecodeOutcome {
    if !buf.starts_with(PREFIX) {
        if PREFIX.starts_with(buf) {
            return DecodeOutcome::NeedMore;
        }
        return DecodeOutcome::Reject;
    }
    let text = match std::str::from_utf8(buf) {
        Ok(text) => text,
        Err(_) => return DecodeOutcome::Reject,
    };
    let imei = text
        .trim_end_matches(['\r', '\n', ';'])
        .split(',')
        .find_map(|field| field.trim().strip_prefix("imei:"))
        .map(|imei| imei.trim().to_string());
    match imei {
        Some(imei) => DecodeOutcome::Frame(Decoded {
            event: TrackerEvent::Login {
                imei: Some(imei),
                type_code: None,
            },
            consumed: buf.len(),
        }),
        None => DecodeOutcome::Reject,
    }
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
