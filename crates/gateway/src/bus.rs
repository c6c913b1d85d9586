//! AMQP bus adapter.
//!
//! Queues are declared durable with a bounded length; messages are
//! persistent UTF-8 JSON. Consumers use manual ack/nack. Declaration is
//! idempotent: a queue that already exists with incompatible arguments is
//! kept as-is rather than failing startup.

use async_trait::async_trait;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions, QueuePurgeOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use thiserror::Error;
use tracing::{info, warn};

/// Commands inbound to the dispatcher (and, payload permitting, the
/// direct-TCP sidecar).
pub const QUEUE_DEVICE_COMMANDS: &str = "device_commands";
/// Every decoded device message.
pub const QUEUE_TRACKER_MESSAGES: &str = "tracker_messages";
/// Alarm events.
pub const QUEUE_DEVICE_ALERTS: &str = "device_alerts";
/// Position reports.
pub const QUEUE_LOCATION_UPDATES: &str = "location_updates";

const DECLARED_QUEUES: [&str; 4] = [
    QUEUE_DEVICE_COMMANDS,
    QUEUE_TRACKER_MESSAGES,
    QUEUE_DEVICE_ALERTS,
    QUEUE_LOCATION_UPDATES,
];

const QUEUE_MAX_LENGTH: i32 = 10_000;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("broker error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("payload serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("broker connection closed")]
    Disconnected,
}

/// Counts reported by a passive queue declare.
#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    pub messages: u32,
    pub consumers: u32,
}

/// A broker connection plus its publish channel.
pub struct MessageBus {
    connection: Connection,
    channel: Channel,
}

impl MessageBus {
    pub async fn connect(url: &str) -> Result<Self, lapin::Error> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        Ok(Self {
            connection,
            channel,
        })
    }

    fn queue_args(ttl_ms: Option<u32>) -> FieldTable {
        let mut args = FieldTable::default();
        args.insert("x-max-length".into(), AMQPValue::LongInt(QUEUE_MAX_LENGTH));
        if let Some(ttl) = ttl_ms {
            args.insert("x-message-ttl".into(), AMQPValue::LongUInt(ttl));
        }
        args
    }

    /// Declares all gateway queues plus the sidecar queue when it differs.
    pub async fn declare_queues(
        &mut self,
        ttl_ms: Option<u32>,
        sidecar_queue: &str,
    ) -> Result<(), lapin::Error> {
        for queue in DECLARED_QUEUES {
            self.declare_queue(queue, ttl_ms).await?;
        }
        if !DECLARED_QUEUES.contains(&sidecar_queue) {
            self.declare_queue(sidecar_queue, ttl_ms).await?;
        }
        Ok(())
    }

    async fn declare_queue(&mut self, queue: &str, ttl_ms: Option<u32>) -> Result<(), lapin::Error> {
        let options = QueueDeclareOptions {
            durable: true,
            ..Default::default()
        };
        match self
            .channel
            .queue_declare(queue, options, Self::queue_args(ttl_ms))
            .await
        {
            Ok(_) => {
                info!(queue, "queue declared");
                Ok(())
            }
            Err(err) => {
                // Existing queue with other arguments: keep it. The failed
                // declare closes the channel, so open a fresh one.
                warn!(queue, error = %err, "queue exists with incompatible arguments, keeping it");
                self.channel = self.connection.create_channel().await?;
                Ok(())
            }
        }
    }

    /// Publishes a persistent JSON message to `queue`.
    pub async fn publish(
        &self,
        queue: &str,
        payload: &serde_json::Value,
    ) -> Result<(), BusError> {
        let body = serde_json::to_vec(payload)?;
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_content_type("application/json".into()),
            )
            .await?
            .await?;
        Ok(())
    }

    /// Starts a manual-ack consumer on `queue`.
    pub async fn consume(&self, queue: &str, tag: &str) -> Result<Consumer, lapin::Error> {
        self.channel
            .basic_consume(
                queue,
                tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
    }

    /// Drops all messages from `queue`, returning how many were removed.
    pub async fn purge(&self, queue: &str) -> Result<u32, lapin::Error> {
        self.channel
            .queue_purge(queue, QueuePurgeOptions::default())
            .await
    }

    /// Message and consumer counts via a passive declare.
    pub async fn queue_stats(&self, queue: &str) -> Result<QueueStats, lapin::Error> {
        let options = QueueDeclareOptions {
            passive: true,
            ..Default::default()
        };
        let state = self
            .channel
            .queue_declare(queue, options, FieldTable::default())
            .await?;
        Ok(QueueStats {
            messages: state.message_count(),
            consumers: state.consumer_count(),
        })
    }
}

/// Publish seam used by sessions; lets tests capture events in memory.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, queue: &str, payload: serde_json::Value) -> Result<(), BusError>;
}

#[async_trait]
impl EventPublisher for MessageBus {
    async fn publish(&self, queue: &str, payload: serde_json::Value) -> Result<(), BusError> {
        MessageBus::publish(self, queue, &payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_args_max_length() {
        let args = MessageBus::queue_args(None);
        let inner = args.inner();
        assert_eq!(
            inner.get(&lapin::types::ShortString::from("x-max-length")),
            Some(&AMQPValue::LongInt(10_000))
        );
        assert!(inner
            .get(&lapin::types::ShortString::from("x-message-ttl"))
            .is_none());
    }

    #[test]
    fn test_queue_args_with_ttl() {
        let args = MessageBus::queue_args(Some(60_000));
        let inner = args.inner();
        assert_eq!(
            inner.get(&lapin::types::ShortString::from("x-message-ttl")),
            Some(&AMQPValue::LongUInt(60_000))
        );
    }

    #[test]
    fn test_declared_queue_names() {
        assert!(DECLARED_QUEUES.contains(&"device_commands"));
        assert!(DECLARED_QUEUES.contains(&"tracker_messages"));
        assert!(DECLARED_QUEUES.contains(&"device_alerts"));
        assert!(DECLARED_QUEUES.contains(&"location_updates"));
    }

    #[test]
    fn test_bus_error_display() {
        let error = BusError::Disconnected;
        assert_eq!(format!("{}", error), "broker connection closed");
    }
}
