//! Per-connection session: buffer, state machine, event dispatch.
//!
//! Each accepted socket runs one session task that owns the socket and the
//! inbound buffer. The task reads, drains the buffer through the codec,
//! dispatches typed events, and writes acks plus any commands queued on its
//! outbound channel. Concurrency exists only between sessions; inside one
//! session everything is sequential, so inbound frames are handled in wire
//! order and socket writes never interleave.

use chrono::Utc;
use domain::models::{is_valid_imei, Device, NewAlert, NewLocation, TrackerBusMessage};
use protocol::{Codec, CodecOutcome, PositionFix, ProtocolKind, TrackerEvent};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::bus::{EventPublisher, QUEUE_DEVICE_ALERTS, QUEUE_LOCATION_UPDATES, QUEUE_TRACKER_MESSAGES};
use crate::registry::{AuthOutcome, DeviceRegistry, OutboundFrame, SessionSeed};
use crate::store::GatewayStore;

/// Hard cap on unparseable buffered bytes; binary framing errors must not
/// leak memory across streams.
pub const MAX_UNPARSED_TAIL: usize = 1024;

/// Outbound command queue depth per session. A full queue fails the
/// command with a backpressure error instead of blocking the dispatcher.
pub const OUTBOUND_QUEUE_DEPTH: usize = 32;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub auth_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(30),
        }
    }
}

/// Dependencies shared by every session.
pub struct SessionContext {
    pub registry: Arc<DeviceRegistry>,
    pub store: Arc<dyn GatewayStore>,
    pub publisher: Arc<dyn EventPublisher>,
    pub settings: SessionSettings,
}

/// Explicit session lifecycle.
enum SessionState {
    /// Accepted, nothing decoded yet.
    Fresh,
    /// A pre-auth greeting was answered; still waiting for an IMEI.
    AuthPending,
    Authenticated { device: Device },
}

/// What one event asks the I/O loop to do.
#[derive(Debug, Default)]
pub struct EventActions {
    pub responses: Vec<Vec<u8>>,
    pub close: bool,
}

impl EventActions {
    fn close() -> Self {
        Self {
            responses: Vec::new(),
            close: true,
        }
    }

    fn respond(bytes: Option<Vec<u8>>) -> Self {
        Self {
            responses: bytes.into_iter().collect(),
            close: false,
        }
    }
}

/// Socket-free part of a session: codec, state and event handling. Kept
/// separate from the I/O loop so dispatch logic is testable directly.
pub struct SessionCore {
    session_id: Uuid,
    peer: SocketAddr,
    ctx: Arc<SessionContext>,
    out_tx: mpsc::Sender<OutboundFrame>,
    cancel: CancellationToken,
    codec: Codec,
    state: SessionState,
    frame_count: u32,
}

impl SessionCore {
    pub fn new(
        ctx: Arc<SessionContext>,
        out_tx: mpsc::Sender<OutboundFrame>,
        cancel: CancellationToken,
        peer: SocketAddr,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            peer,
            ctx,
            out_tx,
            cancel,
            codec: Codec::new(),
            state: SessionState::Fresh,
            frame_count: 0,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, SessionState::Authenticated { .. })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Decodes as many frames as the buffer holds, dispatching each.
    /// Returns the bytes to write back and whether the session must close.
    pub async fn drain(&mut self, buffer: &mut Vec<u8>) -> (Vec<Vec<u8>>, bool) {
        let mut responses = Vec::new();
        let mut close = false;
        while !buffer.is_empty() {
            match self.codec.decode(buffer) {
                CodecOutcome::Frame(decoded) => {
                    let raw: Vec<u8> = buffer.drain(..decoded.consumed).collect();
                    let actions = self.on_event(decoded.event, &raw).await;
                    responses.extend(actions.responses);
                    if actions.close {
                        close = true;
                        break;
                    }
                }
                CodecOutcome::NeedMore => break,
                CodecOutcome::Corrupt => {
                    warn!(peer = %self.peer, "unrecoverable bytes on stream, clearing buffer");
                    buffer.clear();
                    break;
                }
            }
        }
        if !close && buffer.len() >= MAX_UNPARSED_TAIL {
            warn!(
                peer = %self.peer,
                buffered = buffer.len(),
                "unparseable tail exceeded cap, clearing buffer"
            );
            buffer.clear();
        }
        (responses, close)
    }

    async fn on_event(&mut self, event: TrackerEvent, raw: &[u8]) -> EventActions {
        self.frame_count = self.frame_count.wrapping_add(1);
        if self.is_authenticated() {
            self.on_authenticated_event(event, raw).await
        } else {
            self.on_preauth_event(event, raw).await
        }
    }

    async fn on_preauth_event(&mut self, event: TrackerEvent, raw: &[u8]) -> EventActions {
        if let Some(imei) = event.imei().map(str::to_string) {
            return self.try_authenticate(&imei, event, raw).await;
        }
        match event {
            TrackerEvent::Login { imei: None, .. }
                if self.codec.fingerprint() == Some(ProtocolKind::Gps303) =>
            {
                // greeting frame: answer LOAD, keep waiting for the IMEI
                self.state = SessionState::AuthPending;
                EventActions::respond(self.codec.encode_login_ack(true))
            }
            other => {
                debug!(
                    peer = %self.peer,
                    kind = other.kind_str(),
                    "dropping pre-auth event without imei"
                );
                EventActions::default()
            }
        }
    }

    async fn try_authenticate(
        &mut self,
        imei: &str,
        event: TrackerEvent,
        raw: &[u8],
    ) -> EventActions {
        if !is_valid_imei(imei) {
            warn!(peer = %self.peer, imei, "implausible imei, closing");
            return EventActions::close();
        }
        let seed = SessionSeed {
            session_id: self.session_id,
            protocol: self.codec.fingerprint().unwrap_or(ProtocolKind::Generic),
            outbound: self.out_tx.clone(),
            cancel: self.cancel.clone(),
        };
        match self.ctx.registry.authenticate(imei, seed).await {
            Ok(AuthOutcome::Accepted(device)) => {
                info!(
                    imei,
                    protocol = %seed_protocol_name(&self.codec),
                    peer = %self.peer,
                    "device authenticated"
                );
                self.state = SessionState::Authenticated { device };
                self.on_authenticated_event(event, raw).await
            }
            Ok(AuthOutcome::Rejected) => EventActions::close(),
            Err(err) => {
                error!(imei, error = %err, "store error during authentication");
                EventActions::close()
            }
        }
    }

    async fn on_authenticated_event(&mut self, event: TrackerEvent, raw: &[u8]) -> EventActions {
        let (imei, device_id) = match &self.state {
            SessionState::Authenticated { device } => (device.imei.clone(), device.id),
            _ => return EventActions::default(),
        };
        self.ctx.registry.touch_activity(&imei);
        match event {
            TrackerEvent::Login { type_code, .. } => {
                if let Err(err) = self.ctx.registry.touch_login(&imei).await {
                    error!(imei = %imei, error = %err, "store error recording login");
                }
                self.publish(
                    QUEUE_TRACKER_MESSAGES,
                    "login",
                    &imei,
                    device_id,
                    json!({ "typeCode": type_code }),
                )
                .await;
                EventActions::respond(self.codec.encode_login_ack(true))
            }
            TrackerEvent::Location { fix, .. } => {
                self.on_location(&imei, device_id, fix, raw).await
            }
            TrackerEvent::Heartbeat => {
                if let Err(err) = self.ctx.registry.touch_heartbeat(&imei).await {
                    error!(imei = %imei, error = %err, "store error recording heartbeat");
                }
                self.publish(QUEUE_TRACKER_MESSAGES, "heartbeat", &imei, device_id, json!({}))
                    .await;
                EventActions::respond(self.codec.encode_heartbeat_ack())
            }
            TrackerEvent::Alarm { kind, fix, message } => {
                self.on_alarm(&imei, device_id, kind, fix, message, raw).await
            }
            TrackerEvent::CommandResponse { content } => {
                self.on_command_response(&imei, device_id, content).await
            }
            TrackerEvent::Unknown {
                hex,
                printable,
                length,
            } => {
                debug!(imei = %imei, length, "unrecognized frame");
                self.publish(
                    QUEUE_TRACKER_MESSAGES,
                    "unknown",
                    &imei,
                    device_id,
                    json!({ "hex": hex, "printable": printable, "length": length }),
                )
                .await;
                EventActions::default()
            }
        }
    }

    async fn on_location(
        &mut self,
        imei: &str,
        device_id: i64,
        fix: PositionFix,
        raw: &[u8],
    ) -> EventActions {
        let recorded_at = fix.timestamp.unwrap_or_else(Utc::now);
        let input = NewLocation {
            device_id,
            latitude: fix.latitude,
            longitude: fix.longitude,
            speed: fix.speed,
            course: fix.course,
            altitude: fix.altitude,
            recorded_at,
            satellites: fix.satellites,
            hdop: None,
            battery_level: None,
            signal_strength: None,
            raw: Some(hex_string(raw)),
        };
        let ack = EventActions::respond(
            self.codec.encode_location_ack((self.frame_count & 0xFF) as u8),
        );
        if let Err(err) = input.validate() {
            warn!(imei, error = %err, "discarding location with out-of-range coordinates");
            return ack;
        }
        match self.ctx.store.save_location(input).await {
            Ok(_) => {
                let data = json!({
                    "latitude": fix.latitude,
                    "longitude": fix.longitude,
                    "speed": fix.speed,
                    "course": fix.course,
                    "satellites": fix.satellites,
                    "valid": fix.valid,
                    "recordedAt": recorded_at.to_rfc3339(),
                });
                self.publish(QUEUE_LOCATION_UPDATES, "location", imei, device_id, data.clone())
                    .await;
                self.publish(QUEUE_TRACKER_MESSAGES, "location", imei, device_id, data)
                    .await;
            }
            Err(err) => error!(imei, error = %err, "store error saving location"),
        }
        ack
    }

    async fn on_alarm(
        &mut self,
        imei: &str,
        device_id: i64,
        kind: domain::models::AlertKind,
        fix: Option<PositionFix>,
        message: String,
        raw: &[u8],
    ) -> EventActions {
        let triggered_at = fix
            .as_ref()
            .and_then(|f| f.timestamp)
            .unwrap_or_else(Utc::now);
        let input = NewAlert {
            device_id,
            kind,
            message: message.clone(),
            latitude: fix.as_ref().map(|f| f.latitude),
            longitude: fix.as_ref().map(|f| f.longitude),
            triggered_at,
            raw: Some(hex_string(raw)),
        };
        match self.ctx.store.save_alert(input).await {
            Ok(_) => {
                let data = json!({
                    "kind": kind.as_str(),
                    "message": message,
                    "latitude": fix.as_ref().map(|f| f.latitude),
                    "longitude": fix.as_ref().map(|f| f.longitude),
                    "triggeredAt": triggered_at.to_rfc3339(),
                });
                self.publish(QUEUE_DEVICE_ALERTS, "alarm", imei, device_id, data.clone())
                    .await;
                self.publish(QUEUE_TRACKER_MESSAGES, "alarm", imei, device_id, data)
                    .await;
            }
            Err(err) => error!(imei, error = %err, "store error saving alert"),
        }
        EventActions::default()
    }

    async fn on_command_response(
        &mut self,
        imei: &str,
        device_id: i64,
        content: String,
    ) -> EventActions {
        let command_id = self.ctx.registry.take_pending_command(imei);
        match &command_id {
            Some(id) => match self.ctx.store.mark_command_acknowledged(id, &content).await {
                Ok(true) => info!(imei, command = %id, "command acknowledged"),
                Ok(false) => warn!(imei, command = %id, "command was not in sent state"),
                Err(err) => {
                    error!(imei, command = %id, error = %err, "store error acknowledging command")
                }
            },
            None => debug!(imei, "command response with no pending command"),
        }
        self.publish(
            QUEUE_TRACKER_MESSAGES,
            "command_response",
            imei,
            device_id,
            json!({ "response": content, "commandId": command_id }),
        )
        .await;
        EventActions::default()
    }

    async fn publish(
        &self,
        queue: &str,
        kind: &str,
        imei: &str,
        device_id: i64,
        data: serde_json::Value,
    ) {
        let message = TrackerBusMessage::new(kind, imei, device_id, data);
        match serde_json::to_value(&message) {
            Ok(value) => {
                if let Err(err) = self.ctx.publisher.publish(queue, value).await {
                    warn!(queue, error = %err, "bus publish failed");
                }
            }
            Err(err) => warn!(queue, error = %err, "bus envelope serialization failed"),
        }
    }

    /// Deregisters the session and marks the device offline. Called once
    /// when the I/O loop exits.
    pub async fn finish(&self) {
        if let SessionState::Authenticated { device } = &self.state {
            match self
                .ctx
                .registry
                .remove_session(&device.imei, self.session_id)
                .await
            {
                Ok(true) => info!(imei = %device.imei, "session closed, device offline"),
                Ok(false) => debug!(imei = %device.imei, "session already displaced"),
                Err(err) => {
                    error!(imei = %device.imei, error = %err, "store error marking device offline")
                }
            }
        }
    }
}

fn seed_protocol_name(codec: &Codec) -> &'static str {
    codec
        .fingerprint()
        .unwrap_or(ProtocolKind::Generic)
        .as_str()
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Runs one connection to completion: reads, drains, writes acks and
/// queued commands, enforces the authentication deadline.
pub async fn run_session<S>(
    socket: S,
    peer: SocketAddr,
    ctx: Arc<SessionContext>,
    shutdown: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (mut reader, mut writer) = tokio::io::split(socket);
    let (out_tx, mut out_rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_QUEUE_DEPTH);
    let cancel = shutdown.child_token();
    let mut core = SessionCore::new(ctx.clone(), out_tx, cancel.clone(), peer);
    let mut buffer: Vec<u8> = Vec::with_capacity(512);

    let auth_deadline = tokio::time::sleep(ctx.settings.auth_timeout);
    tokio::pin!(auth_deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%peer, "session cancelled");
                break;
            }
            _ = &mut auth_deadline, if !core.is_authenticated() => {
                info!(%peer, "authentication deadline expired, closing");
                break;
            }
            queued = out_rx.recv() => {
                match queued {
                    Some(frame) => {
                        // report the real write outcome to whoever queued
                        // the frame; the dispatcher settles the broker
                        // delivery and the command row from it
                        match writer.write_all(&frame.bytes).await {
                            Ok(()) => {
                                if let Some(result) = frame.result {
                                    let _ = result.send(Ok(()));
                                }
                            }
                            Err(err) => {
                                warn!(%peer, error = %err, "socket write failed");
                                if let Some(result) = frame.result {
                                    let _ = result.send(Err(err));
                                }
                                break;
                            }
                        }
                    }
                    None => break,
                }
            }
            read = reader.read_buf(&mut buffer) => {
                match read {
                    Ok(0) => {
                        debug!(%peer, "peer closed connection");
                        break;
                    }
                    Ok(_) => {
                        let (responses, close) = core.drain(&mut buffer).await;
                        let mut write_failed = false;
                        for bytes in responses {
                            if let Err(err) = writer.write_all(&bytes).await {
                                warn!(%peer, error = %err, "socket write failed");
                                write_failed = true;
                                break;
                            }
                        }
                        if write_failed || close {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(%peer, error = %err, "socket read failed");
                        break;
                    }
                }
            }
        }
    }

    core.finish().await;
    let _ = writer.shutdown().await;
}
