//! Direct-TCP sidecar bridge.
//!
//! An alternate consumer for payloads that name their destination
//! explicitly (`targetHost`/`targetPort`/`rawCommand`): it opens a one-shot
//! TCP connection, writes the raw command and acks on successful write.
//! Payloads without `targetHost` belong to the session dispatcher and are
//! requeued untouched, mirroring the dispatcher's discriminator.

use domain::models::CommandEnvelope;
use futures::StreamExt;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use std::io;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::{BusError, MessageBus};
use crate::dispatcher::Disposition;

/// One-shot socket timeout, applied to connect and to the write.
const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

pub struct DirectTcpBridge {
    queue: String,
}

impl DirectTcpBridge {
    pub fn new(queue: String) -> Self {
        Self { queue }
    }

    /// Consume loop with reconnect: exponential backoff from 1s up to 30s.
    pub async fn run(&self, bus_url: String, shutdown: CancellationToken) {
        let mut backoff = Duration::from_secs(1);
        loop {
            if shutdown.is_cancelled() {
                return;
            }
            match self.consume_loop(&bus_url, &shutdown).await {
                Ok(()) => return,
                Err(err) => {
                    error!(error = %err, "sidecar consumer failed, reconnecting");
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
        let mut consumer = bus.consume(&self.queue, "gateway-sidecar").await?;
        info!(queue = %self.queue, "direct-tcp sidecar consuming");
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

    pub async fn handle_delivery(&self, payload: &[u8], redelivered: bool) -> Disposition {
        let envelope: CommandEnvelope = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "malformed sidecar payload, dropping");
                return Disposition::Ack;
            }
        };
        if !envelope.is_direct_tcp() {
            // the session dispatcher's message; never ack it from here
            return Disposition::Requeue;
        }
        let (Some(host), Some(port)) = (envelope.target_host.as_deref(), envelope.target_port)
        else {
            warn!("direct-tcp payload missing target port, dropping");
            return Disposition::Ack;
        };
        let Some(raw) = envelope.raw_command.as_deref() else {
            warn!(host, "direct-tcp payload missing rawCommand, dropping");
            return Disposition::Ack;
        };

        match send_raw(host, port, raw.as_bytes()).await {
            Ok(()) => {
                info!(host, port, bytes = raw.len(), "raw command delivered");
                Disposition::Ack
            }
            Err(err) => {
                warn!(host, port, error = %err, "raw command delivery failed");
                if redelivered {
                    Disposition::Ack
                } else {
                    Disposition::Requeue
                }
            }
        }
    }
}

/// Resolves, connects and writes one payload within the socket timeout.
/// DNS resolution happens before connect so resolver failures surface as
/// their own error instead of being amplified by connect retries.
pub async fn send_raw(host: &str, port: u16, payload: &[u8]) -> io::Result<()> {
    let mut addrs = tokio::net::lookup_host((host, port)).await?;
    let addr = addrs
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "hostname resolved to nothing"))?;

    let mut stream = tokio::time::timeout(SOCKET_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
    tokio::time::timeout(SOCKET_TIMEOUT, stream.write_all(payload))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write timed out"))??;
    stream.shutdown().await?;
    Ok(())
}
