//! Generic fallback sub-codec.
//!
//! Used when every specific dialect rejects a stream: the whole buffer is
//! consumed into an `unknown` event carrying hex and printable-ASCII views,
//! so nothing a device sends is silently dropped.

use domain::models::CommandKind;

use crate::codec::{raw_command_bytes, DecodeOutcome, Decoded};
use crate::event::TrackerEvent;

pub fn decode(buf: &[u8]) -> DecodeOutcome {
    if buf.is_empty() {
        return DecodeOutcome::NeedMore;
    }
    let hex: String = buf.iter().map(|b| format!("{:02x}", b)).collect();
    let printable: String = buf
        .iter()
        .map(|b| {
            if (0x20..0x7F).contains(b) {
                *b as char
            } else {
                '.'
            }
        })
        .collect();
    DecodeOutcome::Frame(Decoded {
        event: TrackerEvent::Unknown {
            hex,
            printable,
            length: buf.len(),
        },
        consumed: buf.len(),
    })
}

pub fn encode_auth_ack(_ok: bool) -> Vec<u8> {
    b"OK".to_vec()
}

pub fn encode_login_ack(_ok: bool) -> Vec<u8> {
    b"OK".to_vec()
}

pub fn encode_location_ack(_sequence: u8) -> Vec<u8> {
    b"ACK".to_vec()
}

pub fn encode_heartbeat_ack() -> Vec<u8> {
    b"PONG".to_vec()
}

pub fn encode_command(kind: &CommandKind, params: &serde_json::Value) -> Option<Vec<u8>> {
    match kind {
        CommandKind::Raw => raw_command_bytes(params),
        _ => None,
    }
}
