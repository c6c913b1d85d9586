//! H02 dialect placeholder.
//!
//! No decoding is implemented for this dialect; every buffer is rejected
//! and no encodings exist, so commands targeting an H02 session come back
//! unsupported.

use domain::models::CommandKind;

use crate::codec::DecodeOutcome;

pub fn decode(_buf: &[u8]) -> DecodeOutcome {
    DecodeOutcome::Reject
}

pub fn encode_auth_ack(_ok: bool) -> Option<Vec<u8>> {
    None
}

pub fn encode_login_ack(_ok: bool) -> Option<Vec<u8>> {
    None
}

pub fn encode_location_ack(_sequence: u8) -> Option<Vec<u8>> {
    None
}

pub fn encode_heartbeat_ack() -> Option<Vec<u8>> {
    None
}

pub fn encode_command(_kind: &CommandKind, _params: &serde_json::Value) -> Option<Vec<u8>> {
    None
}
