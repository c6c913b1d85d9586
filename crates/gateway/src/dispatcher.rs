//! Command dispatcher: durable queue to device socket.
//!
//! Consumes `device_commands`, resolves the session for the payload's IMEI,
//! encodes the command for the session's pinned dialect and hands it to the
//! session task, then waits for the session to report the outcome of the
//! actual socket write. The row is marked `sent` and the delivery acked
//! only once the bytes reached the socket; waiting also serializes the
//! consumer against slow sockets, which is the backpressure model. The
//! store row is updated before the broker ack, so a crash between the two
//! can only cause a redelivery, never a lost outcome; the SQL transition
//! guards make the redelivery converge on the same terminal status.

use domain::models::{CommandEnvelope, CommandKind};
use futures::StreamExt;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{BusError, MessageBus, QUEUE_DEVICE_COMMANDS};
use crate::registry::{DeviceRegistry, OutboundFrame};
use crate::store::GatewayStore;

/// How a delivery is settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue,
}

#[derive(Clone)]
pub struct CommandDispatcher {
    registry: Arc<DeviceRegistry>,
    store: Arc<dyn GatewayStore>,
}

impl CommandDispatcher {
    pub fn new(registry: Arc<DeviceRegistry>, store: Arc<dyn GatewayStore>) -> Self {
        Self { registry, store }
    }

    /// Consume loop with reconnect: on broker failure, retry with
    /// exponential backoff from 1s up to 30s.
    pub async fn run(&self, bus_url: String, shutdown: CancellationToken) {
        let mut backoff = Duration::from_secs(1);
        loop {
            if shutdown.is_cancelled() {
                return;
            }
            match self.consume_loop(&bus_url, &shutdown).await {
                Ok(()) => return,
                Err(err) => {
                    error!(error = %err, "command consumer failed, reconnecting");
                }
            }
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(Duration::from_secs(30));
        }
    }

    async fn consume_loop(
        &self,
        bus_url: &str,
        shutdown: &CancellationToken,
    ) -> Result<(), BusError> {
        let bus = MessageBus::connect(bus_url).await?;
        let mut consumer = bus.consume(QUEUE_DEVICE_COMMANDS, "gateway-dispatcher").await?;
        info!(queue = QUEUE_DEVICE_COMMANDS, "command dispatcher consuming");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                next = consumer.next() => {
                    let delivery = match next {
                        Some(Ok(delivery)) => delivery,
                        Some(Err(err)) => return Err(err.into()),
                        None => return Err(BusError::Disconnected),
                    };
                    let disposition = self
                        .handle_delivery(&delivery.data, delivery.redelivered)
                        .await;
                    let settled = match disposition {
                        Disposition::Ack => delivery.ack(BasicAckOptions::default()).await,
                        Disposition::Requeue => {
                            delivery
                                .nack(BasicNackOptions {
                                    requeue: true,
                                    ..Default::default()
                                })
                                .await
                        }
                    };
                    settled?;
                }
            }
        }
    }

    /// Decides the fate of one delivery. Pure with respect to the broker,
    /// so it is testable without one.
    pub async fn handle_delivery(&self, payload: &[u8], redelivered: bool) -> Disposition {
        let envelope: CommandEnvelope = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "malformed command payload, dropping");
                return Disposition::Ack;
            }
        };
        if envelope.is_direct_tcp() {
            // belongs to the direct-TCP sidecar sharing this queue
            return Disposition::Requeue;
        }
        let Some(imei) = envelope.imei.as_deref() else {
            warn!("command payload without imei, dropping");
            return Disposition::Ack;
        };
        let command_id = envelope.id.as_deref();

        let Some(handle) = self.registry.lookup(imei) else {
            self.fail(command_id, "Device not connected").await;
            return Disposition::Ack;
        };

        let kind = envelope.command.as_deref().and_then(CommandKind::parse);
        let Some(kind) = kind else {
            self.fail(command_id, "Invalid command format").await;
            return Disposition::Ack;
        };
        let params = envelope.parameters.clone().unwrap_or(serde_json::Value::Null);
        let Some(bytes) = protocol::encode_command(handle.protocol, &kind, &params) else {
            self.fail(command_id, "Invalid command format").await;
            return Disposition::Ack;
        };

        let (frame, outcome) = OutboundFrame::tracked(bytes);
        match handle.outbound.try_send(frame) {
            Ok(()) => match outcome.await {
                Ok(Ok(())) => {
                    if let Some(id) = command_id {
                        match self.store.mark_command_sent(id).await {
                            Ok(true) => {
                                info!(imei, command = id, kind = kind.as_str(), "command sent");
                                self.registry.note_command_sent(imei, id);
                            }
                            Ok(false) => {
                                warn!(command = id, "command not pending, row left unchanged")
                            }
                            Err(err) => {
                                // outcome not recorded yet: keep the delivery
                                error!(command = id, error = %err, "store error recording sent command");
                                return Disposition::Requeue;
                            }
                        }
                    }
                    Disposition::Ack
                }
                Ok(Err(err)) => {
                    warn!(imei, error = %err, "socket write failed before the command left the gateway");
                    self.settle_undelivered(command_id, redelivered, "Socket write failed")
                        .await
                }
                Err(_) => {
                    debug!(imei, "session closed before the command was written");
                    self.settle_undelivered(command_id, redelivered, "Device not connected")
                        .await
                }
            },
            Err(TrySendError::Full(_)) => {
                self.fail(command_id, "backpressure").await;
                Disposition::Ack
            }
            Err(TrySendError::Closed(_)) => {
                debug!(imei, "session closing, requeueing delivery");
                self.settle_undelivered(command_id, redelivered, "Device not connected")
                    .await
            }
        }
    }

    /// Settles a delivery whose bytes never reached the socket. The first
    /// failure leaves the row pending and requeues the delivery so a retry
    /// can still legally move it to `sent`; a redelivered failure is
    /// terminal.
    async fn settle_undelivered(
        &self,
        command_id: Option<&str>,
        redelivered: bool,
        reason: &str,
    ) -> Disposition {
        if redelivered {
            self.fail(command_id, reason).await;
            Disposition::Ack
        } else {
            Disposition::Requeue
        }
    }

    async fn fail(&self, command_id: Option<&str>, reason: &str) {
        let Some(id) = command_id else {
            return;
        };
        match self.store.mark_command_failed(id, reason).await {
            Ok(true) => info!(command = id, reason, "command failed"),
            Ok(false) => warn!(command = id, "command not in a failable state"),
            Err(err) => error!(command = id, error = %err, "store error recording failed command"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionSeed;
    use crate::store::tests_support::StubStore;
    use domain::models::CommandStatus;
    use protocol::ProtocolKind;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    const IMEI: &str = "359710045490084";

    struct Harness {
        dispatcher: CommandDispatcher,
        store: Arc<StubStore>,
        registry: Arc<DeviceRegistry>,
    }

    fn harness(store: StubStore) -> Harness {
        let store = Arc::new(store);
        let registry = Arc::new(DeviceRegistry::new(store.clone()));
        let dispatcher = CommandDispatcher::new(registry.clone(), store.clone());
        Harness {
            dispatcher,
            store,
            registry,
        }
    }

    async fn connect(
        h: &Harness,
        protocol: ProtocolKind,
        depth: usize,
    ) -> mpsc::Receiver<OutboundFrame> {
        let (tx, rx) = mpsc::channel(depth);
        let seed = SessionSeed {
            session_id: Uuid::new_v4(),
            protocol,
            outbound: tx,
            cancel: CancellationToken::new(),
        };
        h.registry.authenticate(IMEI, seed).await.unwrap();
        rx
    }

    /// Simulates the session's write loop: confirms every frame's write
    /// and exposes the bytes that "reached the socket".
    fn confirm_writes(mut rx: mpsc::Receiver<OutboundFrame>) -> mpsc::Receiver<Vec<u8>> {
        let (tx, written) = mpsc::channel(8);
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Some(result) = frame.result {
                    let _ = result.send(Ok(()));
                }
                let _ = tx.send(frame.bytes).await;
            }
        });
        written
    }

    /// Simulates a session whose socket writes fail.
    fn fail_writes(mut rx: mpsc::Receiver<OutboundFrame>) {
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Some(result) = frame.result {
                    let _ = result.send(Err(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "broken pipe",
                    )));
                }
            }
        });
    }

    #[tokio::test]
    async fn test_offline_device_fails_and_acks() {
        let h = harness(StubStore::empty());
        h.store.seed_command("c1", CommandStatus::Pending);
        let payload = br#"{"command_id":"c1","imei":"999","command":"locate"}"#;
        let disposition = h.dispatcher.handle_delivery(payload, false).await;
        assert_eq!(disposition, Disposition::Ack);
        let (status, detail) = h.store.command_state("c1").unwrap();
        assert_eq!(status, CommandStatus::Failed);
        assert_eq!(detail.as_deref(), Some("Device not connected"));
    }

    #[tokio::test]
    async fn test_online_gt06_device_receives_encoded_command() {
        let h = harness(StubStore::with_device(IMEI, true));
        h.store.seed_command("c2", CommandStatus::Pending);
        let rx = connect(&h, ProtocolKind::Gt06, 8).await;
        let mut written = confirm_writes(rx);

        let payload =
            format!(r#"{{"command_id":"c2","imei":"{}","command":"engine_stop"}}"#, IMEI);
        let disposition = h.dispatcher.handle_delivery(payload.as_bytes(), false).await;
        assert_eq!(disposition, Disposition::Ack);

        let bytes = written.recv().await.unwrap();
        assert_eq!(
            bytes,
            vec![0x78, 0x78, 0x05, 0x80, 0x05, 0x01, 0x01, 0x00, 0x8C, 0x0D, 0x0A]
        );
        let (status, _) = h.store.command_state("c2").unwrap();
        assert_eq!(status, CommandStatus::Sent);
        assert_eq!(h.registry.take_pending_command(IMEI).as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn test_replayed_delivery_does_not_demote_acknowledged() {
        let h = harness(StubStore::with_device(IMEI, true));
        h.store.seed_command("c2", CommandStatus::Acknowledged);
        let rx = connect(&h, ProtocolKind::Gt06, 8).await;
        let _written = confirm_writes(rx);

        let payload =
            format!(r#"{{"command_id":"c2","imei":"{}","command":"engine_stop"}}"#, IMEI);
        let disposition = h.dispatcher.handle_delivery(payload.as_bytes(), true).await;
        assert_eq!(disposition, Disposition::Ack);
        let (status, _) = h.store.command_state("c2").unwrap();
        assert_eq!(status, CommandStatus::Acknowledged);
    }

    #[tokio::test]
    async fn test_unsupported_kind_for_dialect_fails_invalid() {
        let h = harness(StubStore::with_device(IMEI, true));
        h.store.seed_command("c3", CommandStatus::Pending);
        // gps303 has no structured command encodings
        let _rx = connect(&h, ProtocolKind::Gps303, 8).await;

        let payload = format!(r#"{{"id":"c3","imei":"{}","command":"locate"}}"#, IMEI);
        let disposition = h.dispatcher.handle_delivery(payload.as_bytes(), false).await;
        assert_eq!(disposition, Disposition::Ack);
        let (status, detail) = h.store.command_state("c3").unwrap();
        assert_eq!(status, CommandStatus::Failed);
        assert_eq!(detail.as_deref(), Some("Invalid command format"));
    }

    #[tokio::test]
    async fn test_unknown_command_name_fails_invalid() {
        let h = harness(StubStore::with_device(IMEI, true));
        h.store.seed_command("c4", CommandStatus::Pending);
        let _rx = connect(&h, ProtocolKind::Gt06, 8).await;

        let payload = format!(r#"{{"id":"c4","imei":"{}","command":"explode"}}"#, IMEI);
        h.dispatcher.handle_delivery(payload.as_bytes(), false).await;
        let (status, detail) = h.store.command_state("c4").unwrap();
        assert_eq!(status, CommandStatus::Failed);
        assert_eq!(detail.as_deref(), Some("Invalid command format"));
    }

    #[tokio::test]
    async fn test_malformed_json_is_dropped_with_ack() {
        let h = harness(StubStore::empty());
        let disposition = h.dispatcher.handle_delivery(b"{not json", false).await;
        assert_eq!(disposition, Disposition::Ack);
    }

    #[tokio::test]
    async fn test_sidecar_payload_is_requeued() {
        let h = harness(StubStore::empty());
        let payload = br#"{"targetHost":"10.0.0.1","targetPort":7700,"rawCommand":"X"}"#;
        let disposition = h.dispatcher.handle_delivery(payload, false).await;
        assert_eq!(disposition, Disposition::Requeue);
    }

    #[tokio::test]
    async fn test_full_outbound_queue_fails_with_backpressure() {
        let h = harness(StubStore::with_device(IMEI, true));
        h.store.seed_command("c5", CommandStatus::Pending);
        let _rx = connect(&h, ProtocolKind::Gt06, 1).await;

        // occupy the depth-1 queue with a frame nothing drains
        let handle = h.registry.lookup(IMEI).unwrap();
        handle
            .outbound
            .try_send(OutboundFrame::untracked(vec![0x00]))
            .unwrap();

        let payload = format!(r#"{{"id":"c5","imei":"{}","command":"locate"}}"#, IMEI);
        let disposition = h.dispatcher.handle_delivery(payload.as_bytes(), false).await;
        assert_eq!(disposition, Disposition::Ack);
        let (status, detail) = h.store.command_state("c5").unwrap();
        assert_eq!(status, CommandStatus::Failed);
        assert_eq!(detail.as_deref(), Some("backpressure"));
    }

    #[tokio::test]
    async fn test_closed_session_requeues_then_fails() {
        let h = harness(StubStore::with_device(IMEI, true));
        h.store.seed_command("c6", CommandStatus::Pending);
        let rx = connect(&h, ProtocolKind::Gt06, 8).await;
        drop(rx); // session went away without deregistering yet

        let payload = format!(r#"{{"id":"c6","imei":"{}","command":"reboot"}}"#, IMEI);
        let first = h.dispatcher.handle_delivery(payload.as_bytes(), false).await;
        assert_eq!(first, Disposition::Requeue);
        let (status, _) = h.store.command_state("c6").unwrap();
        assert_eq!(status, CommandStatus::Pending);

        let second = h.dispatcher.handle_delivery(payload.as_bytes(), true).await;
        assert_eq!(second, Disposition::Ack);
        let (status, detail) = h.store.command_state("c6").unwrap();
        assert_eq!(status, CommandStatus::Failed);
        assert_eq!(detail.as_deref(), Some("Device not connected"));
    }

    #[tokio::test]
    async fn test_write_failure_requeues_then_fails() {
        let h = harness(StubStore::with_device(IMEI, true));
        h.store.seed_command("c8", CommandStatus::Pending);
        let rx = connect(&h, ProtocolKind::Gt06, 8).await;
        fail_writes(rx);

        let payload = format!(r#"{{"id":"c8","imei":"{}","command":"locate"}}"#, IMEI);
        // first failure: nothing recorded yet, delivery requeued
        let first = h.dispatcher.handle_delivery(payload.as_bytes(), false).await;
        assert_eq!(first, Disposition::Requeue);
        let (status, _) = h.store.command_state("c8").unwrap();
        assert_eq!(status, CommandStatus::Pending);

        // redelivered failure is terminal
        let second = h.dispatcher.handle_delivery(payload.as_bytes(), true).await;
        assert_eq!(second, Disposition::Ack);
        let (status, detail) = h.store.command_state("c8").unwrap();
        assert_eq!(status, CommandStatus::Failed);
        assert_eq!(detail.as_deref(), Some("Socket write failed"));
    }

    #[tokio::test]
    async fn test_command_not_marked_sent_until_write_confirms() {
        let h = harness(StubStore::with_device(IMEI, true));
        h.store.seed_command("c9", CommandStatus::Pending);
        let mut rx = connect(&h, ProtocolKind::Gt06, 8).await;

        let dispatcher = h.dispatcher.clone();
        let payload = format!(r#"{{"id":"c9","imei":"{}","command":"locate"}}"#, IMEI);
        let pending_dispatch =
            tokio::spawn(async move { dispatcher.handle_delivery(payload.as_bytes(), false).await });

        // the frame is queued but unwritten: the row must still be pending
        let frame = rx.recv().await.unwrap();
        let (status, _) = h.store.command_state("c9").unwrap();
        assert_eq!(status, CommandStatus::Pending);

        frame.result.unwrap().send(Ok(())).unwrap();
        assert_eq!(pending_dispatch.await.unwrap(), Disposition::Ack);
        let (status, _) = h.store.command_state("c9").unwrap();
        assert_eq!(status, CommandStatus::Sent);
    }

    #[tokio::test]
    async fn test_command_id_alias_accepted() {
        let h = harness(StubStore::with_device(IMEI, true));
        h.store.seed_command("c7", CommandStatus::Pending);
        let rx = connect(&h, ProtocolKind::Gt06, 8).await;
        let _written = confirm_writes(rx);

        let payload = format!(r#"{{"commandId":"c7","imei":"{}","command":"locate"}}"#, IMEI);
        h.dispatcher.handle_delivery(payload.as_bytes(), false).await;
        let (status, _) = h.store.command_state("c7").unwrap();
        assert_eq!(status, CommandStatus::Sent);
    }
}
