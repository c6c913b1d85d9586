//! Composite codec: dialect detection and per-session dispatch.
//!
//! Specific sub-codecs are tried in a fixed order; the first to produce a
//! frame pins the session's fingerprint and later buffers are decoded with
//! that dialect only. When every specific sub-codec rejects, the generic
//! fallback consumes the buffer as an `unknown` event.

use domain::models::CommandKind;

use crate::event::TrackerEvent;
use crate::{generic, gps303, gt06, h02, tk103};

/// The identified protocol dialect of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolKind {
    Gps303,
    Gt06,
    Tk103,
    H02,
    Generic,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Gps303 => "gps303",
            ProtocolKind::Gt06 => "gt06",
            ProtocolKind::Tk103 => "tk103",
            ProtocolKind::H02 => "h02",
            ProtocolKind::Generic => "generic",
        }
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trial order for fingerprint detection.
pub const DETECTION_ORDER: [ProtocolKind; 4] = [
    ProtocolKind::Gps303,
    ProtocolKind::Gt06,
    ProtocolKind::Tk103,
    ProtocolKind::H02,
];

/// A successfully decoded frame and how many buffer bytes it used.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub event: TrackerEvent,
    pub consumed: usize,
}

/// Outcome of a single sub-codec attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    Frame(Decoded),
    /// The buffer holds an incomplete frame; leave it intact.
    NeedMore,
    /// The buffer does not belong to this dialect.
    Reject,
}

/// Outcome of the composite codec.
#[derive(Debug, Clone, PartialEq)]
pub enum CodecOutcome {
    Frame(Decoded),
    NeedMore,
    /// The pinned dialect rejected the buffer; the caller clears it.
    Corrupt,
}

/// Per-session codec state: nothing but the pinned fingerprint.
#[derive(Debug, Default)]
pub struct Codec {
    fingerprint: Option<ProtocolKind>,
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fingerprint(&self) -> Option<ProtocolKind> {
        self.fingerprint
    }

    /// Decodes one frame from the front of `buf`, pinning the fingerprint
    /// on first success.
    pub fn decode(&mut self, buf: &[u8]) -> CodecOutcome {
        if buf.is_empty() {
            return CodecOutcome::NeedMore;
        }
        match self.fingerprint {
            Some(kind) => match decode_with(kind, buf) {
                DecodeOutcome::Frame(decoded) => CodecOutcome::Frame(decoded),
                DecodeOutcome::NeedMore => CodecOutcome::NeedMore,
                DecodeOutcome::Reject => CodecOutcome::Corrupt,
            },
            None => self.detect(buf),
        }
    }

    fn detect(&mut self, buf: &[u8]) -> CodecOutcome {
        let mut need_more = false;
        for kind in DETECTION_ORDER {
            match decode_with(kind, buf) {
                DecodeOutcome::Frame(decoded) => {
                    self.fingerprint = Some(kind);
                    return CodecOutcome::Frame(decoded);
                }
                DecodeOutcome::NeedMore => need_more = true,
                DecodeOutcome::Reject => {}
            }
        }
        if need_more {
            return CodecOutcome::NeedMore;
        }
        self.fingerprint = Some(ProtocolKind::Generic);
        match generic::decode(buf) {
            DecodeOutcome::Frame(decoded) => CodecOutcome::Frame(decoded),
            _ => CodecOutcome::NeedMore,
        }
    }

    pub fn encode_auth_ack(&self, ok: bool) -> Option<Vec<u8>> {
        self.fingerprint.and_then(|kind| encode_auth_ack(kind, ok))
    }

    pub fn encode_login_ack(&self, ok: bool) -> Option<Vec<u8>> {
        self.fingerprint.and_then(|kind| encode_login_ack(kind, ok))
    }

    pub fn encode_location_ack(&self, sequence: u8) -> Option<Vec<u8>> {
        self.fingerprint
            .and_then(|kind| encode_location_ack(kind, sequence))
    }

    pub fn encode_heartbeat_ack(&self) -> Option<Vec<u8>> {
        self.fingerprint.and_then(encode_heartbeat_ack)
    }
}

fn decode_with(kind: ProtocolKind, buf: &[u8]) -> DecodeOutcome {
    match kind {
        ProtocolKind::Gps303 => gps303::decode(buf),
        ProtocolKind::Gt06 => gt06::decode(buf),
        ProtocolKind::Tk103 => tk103::decode(buf),
        ProtocolKind::H02 => h02::decode(buf),
        ProtocolKind::Generic => generic::decode(buf),
    }
}

pub fn encode_auth_ack(kind: ProtocolKind, ok: bool) -> Option<Vec<u8>> {
    match kind {
        ProtocolKind::Gps303 => Some(gps303::encode_auth_ack(ok)),
        ProtocolKind::Gt06 => Some(gt06::encode_auth_ack(ok)),
        ProtocolKind::Tk103 => Some(tk103::encode_auth_ack(ok)),
        ProtocolKind::H02 => h02::encode_auth_ack(ok),
        ProtocolKind::Generic => Some(generic::encode_auth_ack(ok)),
    }
}

pub fn encode_login_ack(kind: ProtocolKind, ok: bool) -> Option<Vec<u8>> {
    match kind {
        ProtocolKind::Gps303 => Some(gps303::encode_login_ack(ok)),
        ProtocolKind::Gt06 => Some(gt06::encode_login_ack(ok)),
        ProtocolKind::Tk103 => Some(tk103::encode_login_ack(ok)),
        ProtocolKind::H02 => h02::encode_login_ack(ok),
        ProtocolKind::Generic => Some(generic::encode_login_ack(ok)),
    }
}

pub fn encode_location_ack(kind: ProtocolKind, sequence: u8) -> Option<Vec<u8>> {
    match kind {
        ProtocolKind::Gps303 => Some(gps303::encode_location_ack(sequence)),
        ProtocolKind::Gt06 => Some(gt06::encode_location_ack(sequence)),
        ProtocolKind::Tk103 => Some(tk103::encode_location_ack(sequence)),
        ProtocolKind::H02 => h02::encode_location_ack(sequence),
        ProtocolKind::Generic => Some(generic::encode_location_ack(sequence)),
    }
}

pub fn encode_heartbeat_ack(kind: ProtocolKind) -> Option<Vec<u8>> {
    match kind {
        ProtocolKind::Gps303 => Some(gps303::encode_heartbeat_ack()),
        ProtocolKind::Gt06 => Some(gt06::encode_heartbeat_ack()),
        ProtocolKind::Tk103 => Some(tk103::encode_heartbeat_ack()),
        ProtocolKind::H02 => h02::encode_heartbeat_ack(),
        ProtocolKind::Generic => Some(generic::encode_heartbeat_ack()),
    }
}

/// Encodes a command for the given dialect; `None` means the kind has no
/// encoding there and the command must be failed as invalid.
pub fn encode_command(
    kind: ProtocolKind,
    command: &CommandKind,
    params: &serde_json::Value,
) -> Option<Vec<u8>> {
    match kind {
        ProtocolKind::Gps303 => gps303::encode_command(command, params),
        ProtocolKind::Gt06 => gt06::encode_command(command, params),
        ProtocolKind::Tk103 => tk103::encode_command(command, params),
        ProtocolKind::H02 => h02::encode_command(command, params),
        ProtocolKind::Generic => generic::encode_command(command, params),
    }
}

/// Extracts the byte payload of a `raw` command from its parameters:
/// either a bare JSON string or an object with a `data`, `raw` or
/// `command` string field.
pub(crate) fn raw_command_bytes(params: &serde_json::Value) -> Option<Vec<u8>> {
    if let Some(text) = params.as_str() {
        return Some(text.as_bytes().to_vec());
    }
    for key in ["data", "raw", "command"] {
        if let Some(text) = params.get(key).and_then(|v| v.as_str()) {
            return Some(text.as_bytes().to_vec());
        }
    }
    None
}
