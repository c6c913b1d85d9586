//! Shared fixtures for gateway integration tests: an in-memory store, a
//! recording publisher and a loopback listener running real sessions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::models::{
    Alert, Command, CommandKind, CommandStatus, Device, Location, NewAlert, NewLocation,
    SystemStats,
};
use persistence::entities::NearbyDeviceEntity;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use tracker_gateway::bus::{BusError, EventPublisher};
use tracker_gateway::registry::DeviceRegistry;
use tracker_gateway::session::{run_session, SessionContext, SessionSettings};
use tracker_gateway::store::GatewayStore;

#[derive(Default)]
pub struct InMemoryStore {
    next_id: AtomicI64,
    pub devices: Mutex<HashMap<String, Device>>,
    pub locations: Mutex<Vec<NewLocation>>,
    pub alerts: Mutex<Vec<NewAlert>>,
    pub commands: Mutex<HashMap<String, (CommandStatus, Option<String>)>>,
}

impl InMemoryStore {
    pub fn with_device(imei: &str) -> Self {
        let store = Self::default();
        let id = store.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        store.devices.lock().unwrap().insert(
            imei.to_string(),
            Device {
                id,
                imei: imei.to_string(),
                company_id: None,
                active: true,
                online: false,
                last_seen: None,
                last_heartbeat: None,
                last_login: None,
                created_at: now,
                updated_at: now,
            },
        );
        store
    }

    pub fn seed_command(&self, id: &str, status: CommandStatus) {
        self.commands
            .lock()
            .unwrap()
            .insert(id.to_string(), (status, None));
    }

    pub fn command_state(&self, id: &str) -> Option<(CommandStatus, Option<String>)> {
        self.commands.lock().unwrap().get(id).cloned()
    }

    pub fn device(&self, imei: &str) -> Option<Device> {
        self.devices.lock().unwrap().get(imei).cloned()
    }

    pub fn location_count(&self) -> usize {
        self.locations.lock().unwrap().len()
    }
}

#[async_trait]
impl GatewayStore for InMemoryStore {
    async fn get_device_by_imei(&self, imei: &str) -> Result<Option<Device>, sqlx::Error> {
        Ok(self.devices.lock().unwrap().get(imei).cloned())
    }

    async fn save_location(&self, input: NewLocation) -> Result<Location, sqlx::Error> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let location = Location {
            id,
            device_id: input.device_id,
            latitude: input.latitude,
            longitude: input.longitude,
            speed: input.speed,
            course: input.course,
            altitude: input.altitude,
            recorded_at: input.recorded_at,
            satellites: input.satellites,
            hdop: input.hdop,
            battery_level: input.battery_level,
            signal_strength: input.signal_strength,
            raw: input.raw.clone(),
            created_at: Utc::now(),
        };
        self.locations.lock().unwrap().push(input);
        Ok(location)
    }

    async fn save_alert(&self, input: NewAlert) -> Result<Alert, sqlx::Error> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let alert = Alert {
            id,
            device_id: input.device_id,
            kind: input.kind,
            message: input.message.clone(),
            latitude: input.latitude,
            longitude: input.longitude,
            triggered_at: input.triggered_at,
            raw: input.raw.clone(),
            resolved: false,
            created_at: Utc::now(),
        };
        self.alerts.lock().unwrap().push(input);
        Ok(alert)
    }

    async fn create_command(
        &self,
        id: &str,
        device_id: i64,
        kind: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<Command, sqlx::Error> {
        self.commands
            .lock()
            .unwrap()
            .insert(id.to_string(), (CommandStatus::Pending, None));
        Ok(Command {
            id: id.to_string(),
            device_id,
            kind: CommandKind::parse(kind).unwrap_or(CommandKind::Raw),
            payload: payload.cloned(),
            status: CommandStatus::Pending,
            created_at: Utc::now(),
            sent_at: None,
            ack_at: None,
            failed_at: None,
            response: None,
            error: None,
        })
    }

    async fn mark_command_sent(&self, id: &str) -> Result<bool, sqlx::Error> {
        let mut commands = self.commands.lock().unwrap();
        match commands.get_mut(id) {
            Some(entry) if entry.0 == CommandStatus::Pending => {
                entry.0 = CommandStatus::Sent;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_command_acknowledged(
        &self,
        id: &str,
        response: &str,
    ) -> Result<bool, sqlx::Error> {
        let mut commands = self.commands.lock().unwrap();
        match commands.get_mut(id) {
            Some(entry) if entry.0 == CommandStatus::Sent => {
                *entry = (CommandStatus::Acknowledged, Some(response.to_string()));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_command_failed(&self, id: &str, error: &str) -> Result<bool, sqlx::Error> {
        let mut commands = self.commands.lock().unwrap();
        match commands.get_mut(id) {
            Some(entry) if matches!(entry.0, CommandStatus::Pending | CommandStatus::Sent) => {
                *entry = (CommandStatus::Failed, Some(error.to_string()));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_stale_commands(&self, _older_than_mins: i64) -> Result<u64, sqlx::Error> {
        Ok(0)
    }

    async fn set_online(&self, imei: &str, online: bool) -> Result<(), sqlx::Error> {
        if let Some(device) = self.devices.lock().unwrap().get_mut(imei) {
            device.online = online;
            if online {
                device.last_seen = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn touch_heartbeat(&self, imei: &str) -> Result<(), sqlx::Error> {
        if let Some(device) = self.devices.lock().unwrap().get_mut(imei) {
            device.online = true;
            device.last_heartbeat = Some(Utc::now());
            device.last_seen = Some(Utc::now());
        }
        Ok(())
    }

    async fn touch_login(&self, imei: &str) -> Result<(), sqlx::Error> {
        if let Some(device) = self.devices.lock().unwrap().get_mut(imei) {
            device.online = true;
            device.last_login = Some(Utc::now());
            device.last_seen = Some(Utc::now());
        }
        Ok(())
    }

    async fn get_last_location(&self, _device_id: i64) -> Result<Option<Location>, sqlx::Error> {
        Ok(None)
    }

    async fn get_location_history(
        &self,
        _device_id: i64,
        _from: Option<DateTime<Utc>>,
        _to: Option<DateTime<Utc>>,
        _limit: i64,
    ) -> Result<Vec<Location>, sqlx::Error> {
        Ok(Vec::new())
    }

    async fn get_nearby(
        &self,
        _latitude: f64,
        _longitude: f64,
        _radius_km: f64,
    ) -> Result<Vec<NearbyDeviceEntity>, sqlx::Error> {
        Ok(Vec::new())
    }

    async fn get_system_stats(&self) -> Result<SystemStats, sqlx::Error> {
        Ok(SystemStats::default())
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<(String, serde_json::Value)>>,
}

impl RecordingPublisher {
    pub fn queues(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(queue, _)| queue.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, queue: &str, payload: serde_json::Value) -> Result<(), BusError> {
        self.published
            .lock()
            .unwrap()
            .push((queue.to_string(), payload));
        Ok(())
    }
}

pub struct Gateway {
    pub addr: SocketAddr,
    pub store: Arc<InMemoryStore>,
    pub publisher: Arc<RecordingPublisher>,
    pub registry: Arc<DeviceRegistry>,
    pub shutdown: CancellationToken,
}

/// Binds an ephemeral loopback listener running real session tasks over
/// the in-memory store and publisher.
pub async fn spawn_gateway(store: InMemoryStore, auth_timeout_ms: u64) -> Gateway {
    let store = Arc::new(store);
    let publisher = Arc::new(RecordingPublisher::default());
    let registry = Arc::new(DeviceRegistry::new(store.clone()));
    let ctx = Arc::new(SessionContext {
        registry: registry.clone(),
        store: store.clone(),
        publisher: publisher.clone(),
        settings: SessionSettings {
            auth_timeout: std::time::Duration::from_millis(auth_timeout_ms),
        },
    });
    let shutdown = CancellationToken::new();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accept_shutdown = shutdown.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = accept_shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    let Ok((socket, peer)) = accepted else { break };
                    let ctx = ctx.clone();
                    let shutdown = accept_shutdown.clone();
                    tokio::spawn(async move {
                        run_session(socket, peer, ctx, shutdown).await;
                    });
                }
            }
        }
    });

    Gateway {
        addr,
        store,
        publisher,
        registry,
        shutdown,
    }
}

/// Builds a GT06 frame with a valid additive checksum.
pub fn gt06_frame(proto: u8, payload: &[u8]) -> Vec<u8> {
    let len = (payload.len() + 3) as u8;
    let mut out = vec![0x78, 0x78, len, proto];
    out.extend_from_slice(payload);
    let crc = protocol::gt06::checksum(&out[2..]);
    out.extend_from_slice(&crc.to_be_bytes());
    out.extend_from_slice(&[0x0D, 0x0A]);
    out
}

pub fn gt06_login_frame() -> Vec<u8> {
    gt06_frame(
        0x01,
        &[0x03, 0x59, 0x71, 0x00, 0x45, 0x49, 0x00, 0x84, 0x50, 0x00],
    )
}

pub const GT06_IMEI: &str = "0359710045490084";
