//! Wire protocols spoken by GPS tracker devices.
//!
//! This crate contains:
//! - Typed events decoded from device frames
//! - Per-dialect sub-codecs (GT06 binary, GPS303/TK103 ASCII, H02 stub)
//! - A composite codec that identifies the dialect of a byte stream and
//!   pins it for the rest of the session
//! - Encoders for device acks and server-to-device commands

mod codec;
mod event;

pub mod generic;
pub mod gps303;
pub mod gt06;
pub mod h02;
pub mod tk103;

pub use codec::{
    encode_auth_ack, encode_command, encode_heartbeat_ack, encode_location_ack, encode_login_ack,
    Codec, CodecOutcome, DecodeOutcome, Decoded, ProtocolKind, DETECTION_ORDER,
};
pub use event::{PositionFix, TrackerEvent};
